use thiserror::Error;

/// Error taxonomy shared by the verification protocol, the worker and the
/// HTTP surface. Upstream outages are deliberately their own variant so the
/// worker can recognise them and fail open.
#[derive(Debug, Error)]
pub enum GateError {
	#[error("validation failed: {0}")]
	Validation(String),
	#[error("unauthorized")]
	Unauthorized,
	#[error("forbidden")]
	Forbidden,
	#[error("invalid signature")]
	InvalidSignature,
	#[error("verification session missing, expired or already used")]
	SessionInvalid,
	#[error("upstream unavailable: {0}")]
	UpstreamUnavailable(String),
	#[error("role not manageable by the bot: {0}")]
	NotManageable(String),
	#[error(transparent)]
	Internal(#[from] anyhow::Error),
}

impl GateError {
	/// Stable machine-readable code used in HTTP error bodies and audit
	/// reasons.
	pub fn code(&self) -> &'static str {
		match self {
			GateError::Validation(_) => "VALIDATION",
			GateError::Unauthorized => "UNAUTHORIZED",
			GateError::Forbidden => "FORBIDDEN",
			GateError::InvalidSignature => "INVALID_SIGNATURE",
			GateError::SessionInvalid => "SESSION_INVALID",
			GateError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
			GateError::NotManageable(_) => "NOT_MANAGEABLE",
			GateError::Internal(_) => "INTERNAL",
		}
	}
}

impl From<sqlx::Error> for GateError {
	fn from(error: sqlx::Error) -> Self {
		GateError::Internal(anyhow::Error::new(error))
	}
}

pub type GateResult<T> = Result<T, GateError>;
