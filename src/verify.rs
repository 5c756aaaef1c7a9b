//! Wallet-verification protocol: challenge issuance, the signed opaque token
//! pointing at a server-side session, Ed25519 signature checking and the
//! wallet-link upsert. The token and the session are both required; neither
//! alone is enough to link a wallet.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::info;
use uuid::Uuid;

use crate::{
	constants::{VERIFY_NONCE_BYTES, VERIFY_SESSION_TTL},
	errors::{GateError, GateResult},
	store::{
		types::{AuditAction, VerifySession},
		Store,
	},
	worker::{RecheckHandle, RecheckRequest},
};

type HmacSha256 = Hmac<Sha256>;

/// Claims bound into the opaque token. The token only points at a session;
/// all protocol state lives server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
	pub server_id: String,
	pub member_id: String,
	pub session_id: Uuid,
	pub exp: i64,
}

/// Symmetric HMAC-SHA256 signer/verifier for session tokens.
#[derive(Clone)]
pub struct TokenCodec {
	key: Vec<u8>,
}

impl TokenCodec {
	pub fn new(secret: &str) -> Self {
		Self { key: secret.as_bytes().to_vec() }
	}

	pub fn sign(&self, claims: &TokenClaims) -> String {
		let payload = serde_json::to_vec(claims).expect("claims always serialize");
		let mut mac =
			HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
		mac.update(&payload);
		let tag = mac.finalize().into_bytes();
		format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), URL_SAFE_NO_PAD.encode(tag))
	}

	/// Checks the MAC (constant-time) and the embedded expiry.
	pub fn verify(&self, token: &str, now: DateTime<Utc>) -> GateResult<TokenClaims> {
		let (payload_b64, tag_b64) = token
			.split_once('.')
			.ok_or_else(|| GateError::Validation("malformed token".to_string()))?;
		let payload = URL_SAFE_NO_PAD
			.decode(payload_b64)
			.map_err(|_| GateError::Validation("malformed token".to_string()))?;
		let tag = URL_SAFE_NO_PAD
			.decode(tag_b64)
			.map_err(|_| GateError::Validation("malformed token".to_string()))?;

		let mut mac =
			HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
		mac.update(&payload);
		mac.verify_slice(&tag)
			.map_err(|_| GateError::Validation("tampered token".to_string()))?;

		let claims: TokenClaims = serde_json::from_slice(&payload)
			.map_err(|_| GateError::Validation("malformed token".to_string()))?;
		if claims.exp <= now.timestamp() {
			return Err(GateError::SessionInvalid);
		}
		Ok(claims)
	}
}

/// The exact message the wallet signs. The server chooses it; clients cannot
/// substitute their own.
pub fn challenge_message(
	server_id: &str,
	member_id: &str,
	nonce: &str,
	expires_at: DateTime<Utc>,
) -> String {
	format!(
		"Verify Discord {member_id} in Guild {server_id} nonce {nonce} exp {}",
		expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
	)
}

/// Ed25519 check of `signature_b58` by `wallet_pubkey_b58` over `message`.
pub fn check_wallet_signature(
	wallet_pubkey_b58: &str,
	signature_b58: &str,
	message: &str,
) -> GateResult<()> {
	let pubkey_bytes = bs58::decode(wallet_pubkey_b58)
		.into_vec()
		.map_err(|_| GateError::Validation("wallet_pubkey is not valid base58".to_string()))?;
	let pubkey: [u8; 32] = pubkey_bytes
		.try_into()
		.map_err(|_| GateError::Validation("wallet_pubkey must decode to 32 bytes".to_string()))?;
	let verifying_key =
		VerifyingKey::from_bytes(&pubkey).map_err(|_| GateError::InvalidSignature)?;

	let signature_bytes = bs58::decode(signature_b58)
		.into_vec()
		.map_err(|_| GateError::Validation("signature is not valid base58".to_string()))?;
	let signature_array: [u8; 64] = signature_bytes
		.try_into()
		.map_err(|_| GateError::Validation("signature must decode to 64 bytes".to_string()))?;
	let signature = Signature::from_bytes(&signature_array);

	verifying_key
		.verify_strict(message.as_bytes(), &signature)
		.map_err(|_| GateError::InvalidSignature)
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
	pub token: String,
	pub verify_url: String,
	pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Challenge {
	pub challenge_message: String,
	pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
	pub server_id: String,
	pub member_id: String,
	pub replaced: bool,
}

pub struct VerifyService {
	store: Store,
	codec: TokenCodec,
	public_base_url: String,
	recheck: RecheckHandle,
}

impl VerifyService {
	pub fn new(
		store: Store,
		codec: TokenCodec,
		public_base_url: String,
		recheck: RecheckHandle,
	) -> Self {
		let public_base_url = public_base_url.trim_end_matches('/').to_string();
		Self { store, codec, public_base_url, recheck }
	}

	/// Creates a session with a fresh nonce and returns the token + deep
	/// link the member follows to sign the challenge.
	pub async fn create_session(
		&self,
		server_id: &str,
		member_id: &str,
	) -> GateResult<CreatedSession> {
		if server_id.is_empty() || member_id.is_empty() {
			return Err(GateError::Validation("guild and member ids are required".to_string()));
		}

		self.store.ensure_server(server_id).await?;

		let now = Utc::now();
		let expires_at = now
			+ chrono::Duration::from_std(VERIFY_SESSION_TTL).expect("session TTL is in range");

		let mut nonce_bytes = [0u8; VERIFY_NONCE_BYTES];
		rand::thread_rng().fill_bytes(&mut nonce_bytes);
		let nonce = hex::encode(nonce_bytes);

		let session = VerifySession {
			id: Uuid::new_v4(),
			server_id: server_id.to_string(),
			member_id: member_id.to_string(),
			nonce: nonce.clone(),
			challenge_message: challenge_message(server_id, member_id, &nonce, expires_at),
			expires_at,
			used_at: None,
			created_at: now,
		};
		self.store.insert_session(&session).await?;

		let token = self.codec.sign(&TokenClaims {
			server_id: server_id.to_string(),
			member_id: member_id.to_string(),
			session_id: session.id,
			exp: expires_at.timestamp(),
		});
		let verify_url = format!("{}/verify?token={token}", self.public_base_url);

		info!("Created verification session for {member_id} in {server_id}");
		Ok(CreatedSession { token, verify_url, expires_at })
	}

	pub async fn get_challenge(&self, token: &str) -> GateResult<Challenge> {
		let session = self.load_usable_session(token).await?;
		Ok(Challenge {
			challenge_message: session.challenge_message,
			expires_at: session.expires_at,
		})
	}

	/// Verifies the wallet signature over the stored challenge and links the
	/// wallet. The session is consumed *before* the link is written, so a
	/// replay can never land twice even if the upsert fails.
	pub async fn submit(
		&self,
		token: &str,
		wallet_pubkey: &str,
		signature_b58: &str,
	) -> GateResult<SubmitOutcome> {
		let session = self.load_usable_session(token).await?;

		check_wallet_signature(wallet_pubkey, signature_b58, &session.challenge_message)?;

		let now = Utc::now();
		if !self.store.consume_session(session.id, now).await? {
			// Lost the race against a concurrent submit, or expired meanwhile.
			return Err(GateError::SessionInvalid);
		}

		let previous =
			self.store.upsert_wallet_link(&session.server_id, &session.member_id, wallet_pubkey, now).await?;
		let replaced = previous.is_some();

		let (action, reason) = match &previous {
			Some(old) => (
				AuditAction::VerifyReplaced,
				format!("wallet {old} replaced by {wallet_pubkey}"),
			),
			None => (AuditAction::VerifySuccess, format!("wallet {wallet_pubkey} verified")),
		};
		self.store
			.record_audit(&session.server_id, &session.member_id, None, "", action, &reason)
			.await?;

		self.recheck.enqueue(RecheckRequest::Member {
			server_id: session.server_id.clone(),
			member_id: session.member_id.clone(),
		});

		info!("Wallet verified for {} in {}", session.member_id, session.server_id);
		Ok(SubmitOutcome { server_id: session.server_id, member_id: session.member_id, replaced })
	}

	/// Deletes the wallet link and schedules removal of every managed role.
	pub async fn unlink(&self, server_id: &str, member_id: &str) -> GateResult<bool> {
		let deleted = self.store.delete_wallet_link(server_id, member_id).await?;
		if deleted {
			self.store
				.record_audit(
					server_id,
					member_id,
					None,
					"",
					AuditAction::VerifyUnlinked,
					"wallet link removed by member",
				)
				.await?;
			self.recheck.enqueue(RecheckRequest::RemoveManagedRoles {
				server_id: server_id.to_string(),
				member_id: member_id.to_string(),
			});
			info!("Wallet unlinked for {member_id} in {server_id}");
		}
		Ok(deleted)
	}

	async fn load_usable_session(&self, token: &str) -> GateResult<VerifySession> {
		let now = Utc::now();
		let claims = self.codec.verify(token, now)?;

		let session =
			self.store.session(claims.session_id).await?.ok_or(GateError::SessionInvalid)?;
		if session.server_id != claims.server_id || session.member_id != claims.member_id {
			return Err(GateError::SessionInvalid);
		}
		if !session.is_usable(now) {
			return Err(GateError::SessionInvalid);
		}
		Ok(session)
	}
}

#[cfg(test)]
mod tests {
	use chrono::TimeZone;
	use ed25519_dalek::{Signer, SigningKey};

	use super::*;

	fn codec() -> TokenCodec {
		TokenCodec::new("0123456789abcdef0123456789abcdef")
	}

	fn claims() -> TokenClaims {
		TokenClaims {
			server_id: "guild-1".to_string(),
			member_id: "member-1".to_string(),
			session_id: Uuid::new_v4(),
			exp: (Utc::now() + chrono::Duration::minutes(10)).timestamp(),
		}
	}

	#[test]
	fn challenge_message_has_exact_shape() {
		let expires_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
		let message = challenge_message("123456789", "987654321", "a1b2c3", expires_at);
		assert_eq!(
			message,
			"Verify Discord 987654321 in Guild 123456789 nonce a1b2c3 exp 2025-06-01T12:30:00Z"
		);
	}

	#[test]
	fn token_roundtrip() {
		let codec = codec();
		let claims = claims();
		let token = codec.sign(&claims);
		let decoded = codec.verify(&token, Utc::now()).unwrap();
		assert_eq!(decoded, claims);
	}

	#[test]
	fn tampered_token_rejected() {
		let codec = codec();
		let token = codec.sign(&claims());

		// Flip a character inside the payload half.
		let mut tampered: Vec<char> = token.chars().collect();
		tampered[4] = if tampered[4] == 'A' { 'B' } else { 'A' };
		let tampered: String = tampered.into_iter().collect();

		assert!(matches!(
			codec.verify(&tampered, Utc::now()),
			Err(GateError::Validation(_))
		));
	}

	#[test]
	fn token_signed_with_other_key_rejected() {
		let token = TokenCodec::new("another-secret-another-secret-00").sign(&claims());
		assert!(matches!(codec().verify(&token, Utc::now()), Err(GateError::Validation(_))));
	}

	#[test]
	fn expired_token_rejected() {
		let codec = codec();
		let mut claims = claims();
		claims.exp = (Utc::now() - chrono::Duration::minutes(1)).timestamp();
		let token = codec.sign(&claims);
		assert!(matches!(codec.verify(&token, Utc::now()), Err(GateError::SessionInvalid)));
	}

	#[test]
	fn signature_over_challenge_verifies() {
		let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
		let message = challenge_message("g", "m", "6e6f6e6365", Utc::now());
		let signature = signing_key.sign(message.as_bytes());

		let pubkey_b58 = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
		let signature_b58 = bs58::encode(signature.to_bytes()).into_string();

		assert!(check_wallet_signature(&pubkey_b58, &signature_b58, &message).is_ok());
	}

	#[test]
	fn signature_over_different_message_rejected() {
		let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
		let message = challenge_message("g", "m", "6e6f6e6365", Utc::now());
		let signature = signing_key.sign("a different message".as_bytes());

		let pubkey_b58 = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
		let signature_b58 = bs58::encode(signature.to_bytes()).into_string();

		assert!(matches!(
			check_wallet_signature(&pubkey_b58, &signature_b58, &message),
			Err(GateError::InvalidSignature)
		));
	}

	#[test]
	fn short_pubkey_rejected() {
		let signature_b58 = bs58::encode([0u8; 64]).into_string();
		assert!(matches!(
			check_wallet_signature("abc", &signature_b58, "message"),
			Err(GateError::Validation(_))
		));
	}

	#[test]
	fn short_signature_rejected() {
		let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
		let pubkey_b58 = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
		let short = bs58::encode([0u8; 10]).into_string();
		assert!(matches!(
			check_wallet_signature(&pubkey_b58, &short, "message"),
			Err(GateError::Validation(_))
		));
	}

	#[tokio::test]
	#[ignore = "requires database"]
	async fn concurrent_submits_cannot_both_succeed() {
		let store = crate::store::test_utils::connect_test_store().await;
		let (recheck, mut recheck_rx) = crate::worker::test_utils::recheck_channel();
		let service = VerifyService::new(
			store,
			codec(),
			"http://127.0.0.1:8787".to_string(),
			recheck,
		);

		let server_id = format!("guild-{}", Uuid::new_v4().simple());
		let created = service.create_session(&server_id, "member-1").await.unwrap();
		let challenge = service.get_challenge(&created.token).await.unwrap();

		let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
		let signature = signing_key.sign(challenge.challenge_message.as_bytes());
		let pubkey_b58 = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
		let signature_b58 = bs58::encode(signature.to_bytes()).into_string();

		let (first, second) = tokio::join!(
			service.submit(&created.token, &pubkey_b58, &signature_b58),
			service.submit(&created.token, &pubkey_b58, &signature_b58),
		);

		// Exactly one wins the atomic session claim; the loser sees the
		// session as already used.
		assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
		let loser = if first.is_ok() { second } else { first };
		assert!(matches!(loser, Err(GateError::SessionInvalid)));

		// A replay of the same token after success is rejected the same way,
		// and only the winning submit enqueued a recheck.
		assert!(matches!(
			service.submit(&created.token, &pubkey_b58, &signature_b58).await,
			Err(GateError::SessionInvalid)
		));
		assert!(recheck_rx.try_recv().is_ok());
		assert!(recheck_rx.try_recv().is_err());
	}
}
