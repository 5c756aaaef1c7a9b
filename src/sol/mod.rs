//! Chain-holdings adapter: turns a wallet public key into a point-in-time
//! snapshot of token balances and verified-collection NFT counts.

pub mod das;
pub mod rpc;

use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use url::Url;

use crate::{
	errors::{GateError, GateResult},
	retrier::with_backoff,
};

/// Which snapshot slices a check actually needs; skipping a slice skips its
/// upstream calls entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotSlices {
	pub token_balances: bool,
	pub nft_counts: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WalletSnapshot {
	pub wallet: String,
	pub token_balances_by_mint: BTreeMap<String, BigDecimal>,
	pub nft_counts_by_verified_collection: BTreeMap<String, u64>,
}

#[derive(Clone)]
pub struct HoldingsClient {
	rpc: rpc::SolRpcClient,
	das: das::DasClient,
}

impl HoldingsClient {
	pub fn new(client: reqwest::Client, rpc_endpoint: Url, das_endpoint: Url) -> Self {
		Self {
			rpc: rpc::SolRpcClient::new(client.clone(), rpc_endpoint),
			das: das::DasClient::new(client, das_endpoint),
		}
	}

	/// Fetches the requested slices for `wallet`. Each upstream call retries
	/// on the bounded backoff schedule; exhaustion surfaces as
	/// `UPSTREAM_UNAVAILABLE` and the caller decides what an outage means.
	pub async fn snapshot(
		&self,
		wallet: &str,
		slices: SnapshotSlices,
	) -> GateResult<WalletSnapshot> {
		let mut snapshot = WalletSnapshot { wallet: wallet.to_string(), ..Default::default() };

		if slices.token_balances {
			snapshot.token_balances_by_mint =
				with_backoff("getTokenAccountsByOwner", || {
					self.rpc.token_balances_by_mint(wallet)
				})
				.await
				.map_err(|e| GateError::UpstreamUnavailable(format!("chain rpc: {e:#}")))?;
		}

		if slices.nft_counts {
			snapshot.nft_counts_by_verified_collection =
				self.nft_counts_by_verified_collection(wallet).await?;
		}

		Ok(snapshot)
	}

	async fn nft_counts_by_verified_collection(
		&self,
		wallet: &str,
	) -> GateResult<BTreeMap<String, u64>> {
		let mut counts = BTreeMap::new();
		let mut page = 1u64;

		loop {
			let assets = with_backoff("getAssetsByOwner", || {
				self.das.assets_by_owner_page(wallet, page)
			})
			.await
			.map_err(|e| GateError::UpstreamUnavailable(format!("asset indexer: {e:#}")))?;

			let page_len = assets.len();
			for asset in &assets {
				if let Some(collection) = asset.verified_collection_key() {
					*counts.entry(collection.to_string()).or_insert(0) += 1;
				}
			}

			if page_len < crate::constants::DAS_PAGE_LIMIT {
				break;
			}
			page += 1;
		}

		Ok(counts)
	}
}
