use std::time::Duration;

// ======= Verification =======

/// How long a verification session (and the token pointing at it) stays valid.
pub const VERIFY_SESSION_TTL: Duration = Duration::from_secs(10 * 60);

/// Nonce entropy in bytes (hex-encoded into the challenge message).
pub const VERIFY_NONCE_BYTES: usize = 16;

// ======= Upstream HTTP =======

/// Backoff schedule applied between failed upstream attempts. Total attempts
/// are bounded at `BACKOFF_SCHEDULE.len() + 1`.
pub const BACKOFF_SCHEDULE: [Duration; 3] = [
	Duration::from_millis(250),
	Duration::from_millis(750),
	Duration::from_millis(1750),
];

/// Page size requested from the asset indexer; pagination stops on a short page.
pub const DAS_PAGE_LIMIT: usize = 1000;

pub const SPL_TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

// Trailing slash matters: relative joins must keep the version segment.
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10/";

// ======= Price cache =======

/// A stored quote younger than this is served without an upstream call.
pub const PRICE_QUOTE_TTL: Duration = Duration::from_secs(60);

// ======= Scheduled cycle lock =======

/// Fixed advisory-lock key pair; at most one process in the deployment runs
/// the scheduled cycle at a time.
pub const CYCLE_LOCK_KEY: (i32, i32) = (0x6761_7465, 0x0000_0001);
