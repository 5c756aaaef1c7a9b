//! Chat-platform contract: the small slice of the Discord REST API the
//! engine consumes, plus the permission/hierarchy gate applied before any
//! role mutation.

pub mod rest;

use serde::{Deserialize, Deserializer};

pub const PERMISSION_ADMINISTRATOR: u64 = 1 << 3;
pub const PERMISSION_MANAGE_ROLES: u64 = 1 << 28;

#[derive(Debug, Clone, Deserialize)]
pub struct Guild {
	pub id: String,
	pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Role {
	pub id: String,
	pub name: String,
	pub position: i64,
	#[serde(deserialize_with = "permissions_bits")]
	pub permissions: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
	pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
	pub user: User,
	#[serde(default)]
	pub roles: Vec<String>,
}

impl Member {
	pub fn has_role(&self, role_id: &str) -> bool {
		self.roles.iter().any(|id| id == role_id)
	}
}

// Discord serialises the permission bitfield as a decimal string.
fn permissions_bits<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
	let raw = String::deserialize(deserializer)?;
	raw.parse::<u64>().map_err(serde::de::Error::custom)
}

#[async_trait::async_trait]
pub trait DiscordApi: Send + Sync {
	/// `Ok(None)` means the guild does not exist or the bot cannot see it.
	async fn guild(&self, guild_id: &str) -> anyhow::Result<Option<Guild>>;
	async fn member(&self, guild_id: &str, user_id: &str) -> anyhow::Result<Option<Member>>;
	async fn roles(&self, guild_id: &str) -> anyhow::Result<Vec<Role>>;
	async fn bot_member(&self, guild_id: &str) -> anyhow::Result<Option<Member>>;
	async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> anyhow::Result<()>;
	async fn remove_role(
		&self,
		guild_id: &str,
		user_id: &str,
		role_id: &str,
	) -> anyhow::Result<()>;
}

/// Whether the bot may mutate `target_role_id`: it needs the role-management
/// permission (or administrator) and its highest role must rank strictly
/// above the target.
pub fn can_manage_role(bot_member: &Member, guild_roles: &[Role], target_role_id: &str) -> bool {
	let Some(target) = guild_roles.iter().find(|role| role.id == target_role_id) else {
		return false;
	};

	let bot_roles: Vec<&Role> =
		guild_roles.iter().filter(|role| bot_member.has_role(&role.id)).collect();

	let permissions = bot_roles.iter().fold(0u64, |acc, role| acc | role.permissions);
	if permissions & (PERMISSION_MANAGE_ROLES | PERMISSION_ADMINISTRATOR) == 0 {
		return false;
	}

	let highest = bot_roles.iter().map(|role| role.position).max().unwrap_or(0);
	highest > target.position
}
