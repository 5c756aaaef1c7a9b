use anyhow::anyhow;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct WalletLink {
	pub id: Uuid,
	pub server_id: String,
	pub member_id: String,
	pub wallet_pubkey: String,
	pub verified_at: DateTime<Utc>,
	pub last_checked_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct VerifySession {
	pub id: Uuid,
	pub server_id: String,
	pub member_id: String,
	pub nonce: String,
	pub challenge_message: String,
	pub expires_at: DateTime<Utc>,
	pub used_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

impl VerifySession {
	/// A session can be consumed only while unexpired and unused.
	pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
		self.used_at.is_none() && self.expires_at > now
	}
}

/// The rule payload as a sum type; the stored row is wide with nullable
/// columns, but in memory each variant carries only its own fields.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
	TokenAmount { mint: String, threshold_amount: BigDecimal },
	TokenUsd { mint: String, threshold_usd: BigDecimal, price_asset_id: String },
	NftCollection { collection_address: String, threshold_count: u64 },
}

#[derive(Debug, Clone)]
pub struct GatingRule {
	pub id: Uuid,
	pub server_id: String,
	pub role_id: String,
	pub enabled: bool,
	pub created_by: String,
	pub kind: RuleKind,
}

/// Raw row shape; converted into [`GatingRule`] with validation so a row
/// whose nullable columns do not match its kind never reaches the evaluator.
#[derive(Debug, Clone, FromRow)]
pub struct GatingRuleRow {
	pub id: Uuid,
	pub server_id: String,
	pub role_id: String,
	pub kind: String,
	pub enabled: bool,
	pub created_by: String,
	pub mint: Option<String>,
	pub threshold_amount: Option<BigDecimal>,
	pub threshold_usd: Option<BigDecimal>,
	pub price_source: Option<String>,
	pub price_asset_id: Option<String>,
	pub collection_address: Option<String>,
	pub threshold_count: Option<i64>,
}

impl TryFrom<GatingRuleRow> for GatingRule {
	type Error = anyhow::Error;

	fn try_from(row: GatingRuleRow) -> Result<Self, Self::Error> {
		let kind = match row.kind.as_str() {
			"TOKEN_AMOUNT" => RuleKind::TokenAmount {
				mint: row.mint.ok_or_else(|| anyhow!("TOKEN_AMOUNT rule without mint"))?,
				threshold_amount: non_negative(
					row.threshold_amount
						.ok_or_else(|| anyhow!("TOKEN_AMOUNT rule without threshold_amount"))?,
					"threshold_amount",
				)?,
			},
			"TOKEN_USD" => {
				match row.price_source.as_deref() {
					Some("COINGECKO") => {},
					other => return Err(anyhow!("unsupported price source {other:?}")),
				}
				RuleKind::TokenUsd {
					mint: row.mint.ok_or_else(|| anyhow!("TOKEN_USD rule without mint"))?,
					threshold_usd: non_negative(
						row.threshold_usd
							.ok_or_else(|| anyhow!("TOKEN_USD rule without threshold_usd"))?,
						"threshold_usd",
					)?,
					price_asset_id: row
						.price_asset_id
						.ok_or_else(|| anyhow!("TOKEN_USD rule without price_asset_id"))?,
				}
			},
			"NFT_COLLECTION" => RuleKind::NftCollection {
				collection_address: row
					.collection_address
					.ok_or_else(|| anyhow!("NFT_COLLECTION rule without collection_address"))?,
				threshold_count: u64::try_from(
					row.threshold_count
						.ok_or_else(|| anyhow!("NFT_COLLECTION rule without threshold_count"))?,
				)
				.map_err(|_| anyhow!("negative threshold_count"))?,
			},
			other => return Err(anyhow!("unknown rule kind {other:?}")),
		};

		Ok(GatingRule {
			id: row.id,
			server_id: row.server_id,
			role_id: row.role_id,
			enabled: row.enabled,
			created_by: row.created_by,
			kind,
		})
	}
}

fn non_negative(value: BigDecimal, field: &str) -> anyhow::Result<BigDecimal> {
	if value < BigDecimal::from(0) {
		return Err(anyhow!("negative {field}"));
	}
	Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
	RoleAdded,
	RoleRemoved,
	VerifySuccess,
	VerifyReplaced,
	VerifyUnlinked,
}

impl AuditAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditAction::RoleAdded => "ROLE_ADDED",
			AuditAction::RoleRemoved => "ROLE_REMOVED",
			AuditAction::VerifySuccess => "VERIFY_SUCCESS",
			AuditAction::VerifyReplaced => "VERIFY_REPLACED",
			AuditAction::VerifyUnlinked => "VERIFY_UNLINKED",
		}
	}
}

#[derive(Debug, Clone, FromRow)]
pub struct PriceQuote {
	pub asset_id: String,
	pub price_usd: BigDecimal,
	pub fetched_at: DateTime<Utc>,
}
