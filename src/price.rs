//! USD price cache. Stored quotes younger than the TTL are served straight
//! from the database; misses are batched into one upstream call per distinct
//! missing set, and concurrent callers for the same set share a single
//! in-flight fetch instead of stampeding the provider.

use std::{
	collections::{BTreeSet, HashMap},
	str::FromStr,
	sync::Arc,
};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use url::Url;

use crate::{
	constants::PRICE_QUOTE_TTL,
	errors::{GateError, GateResult},
	retrier::with_backoff,
	store::{types::PriceQuote, Store},
};

type PriceMap = HashMap<String, BigDecimal>;
type Waiter = oneshot::Sender<Result<PriceMap, String>>;

#[derive(Clone)]
pub struct PriceCache {
	store: Store,
	client: reqwest::Client,
	base_url: Url,
	in_flight: Arc<Mutex<HashMap<Vec<String>, Vec<Waiter>>>>,
}

impl PriceCache {
	pub fn new(store: Store, client: reqwest::Client, mut base_url: Url) -> Self {
		// Relative joins drop the last path segment unless the base ends
		// with a slash.
		if !base_url.path().ends_with('/') {
			base_url.set_path(&format!("{}/", base_url.path()));
		}
		Self { store, client, base_url, in_flight: Arc::new(Mutex::new(HashMap::new())) }
	}

	/// Returns USD prices for the requested asset ids. An absent entry in
	/// the result means "price unknown"; callers treat the rules that need
	/// it as indeterminate.
	pub async fn get_usd_prices(&self, asset_ids: &BTreeSet<String>) -> GateResult<PriceMap> {
		if asset_ids.is_empty() {
			return Ok(PriceMap::new());
		}

		let now = Utc::now();
		let cutoff = now
			- Duration::from_std(PRICE_QUOTE_TTL).expect("price TTL fits in chrono::Duration");

		let requested: Vec<String> = asset_ids.iter().cloned().collect();
		let mut prices: PriceMap = self
			.store
			.fresh_quotes(&requested, cutoff)
			.await?
			.into_iter()
			.map(|quote| (quote.asset_id, quote.price_usd))
			.collect();

		let missing: Vec<String> =
			requested.iter().filter(|id| !prices.contains_key(*id)).cloned().collect();
		if missing.is_empty() {
			return Ok(prices);
		}

		let fetched = self.coalesced_fetch(missing, now).await?;
		prices.extend(fetched);
		Ok(prices)
	}

	/// Leader/follower coalescing keyed by the missing set: the first caller
	/// performs the upstream fetch, everyone else waits on its result.
	async fn coalesced_fetch(
		&self,
		missing: Vec<String>,
		now: DateTime<Utc>,
	) -> GateResult<PriceMap> {
		let follower_rx = {
			let mut in_flight = self.in_flight.lock().await;
			match in_flight.get_mut(&missing) {
				Some(waiters) => {
					let (tx, rx) = oneshot::channel();
					waiters.push(tx);
					Some(rx)
				},
				None => {
					in_flight.insert(missing.clone(), Vec::new());
					None
				},
			}
		};

		if let Some(rx) = follower_rx {
			debug!("Joining in-flight price fetch for {missing:?}");
			return match rx.await {
				Ok(Ok(prices)) => Ok(prices),
				Ok(Err(message)) => Err(GateError::UpstreamUnavailable(message)),
				Err(_) => Err(GateError::UpstreamUnavailable(
					"in-flight price fetch was dropped".to_string(),
				)),
			};
		}

		let result = self.fetch_and_store(&missing, now).await;

		let waiters = self.in_flight.lock().await.remove(&missing).unwrap_or_default();
		for waiter in waiters {
			let _ = waiter.send(match &result {
				Ok(prices) => Ok(prices.clone()),
				Err(error) => Err(error.to_string()),
			});
		}

		result
	}

	async fn fetch_and_store(
		&self,
		missing: &[String],
		now: DateTime<Utc>,
	) -> GateResult<PriceMap> {
		let body = with_backoff("simple/price", || async {
			let response = self
				.client
				.get(self.base_url.join("simple/price").expect("static path segment"))
				.query(&[("ids", missing.join(",").as_str()), ("vs_currencies", "usd")])
				.send()
				.await?
				.error_for_status()?;
			Ok(response.json::<serde_json::Value>().await?)
		})
		.await
		.map_err(|e| GateError::UpstreamUnavailable(format!("price provider: {e:#}")))?;

		let parsed = parse_price_body(&body, missing);
		for (asset_id, price_usd) in &parsed {
			self.store
				.upsert_quote(&PriceQuote {
					asset_id: asset_id.clone(),
					price_usd: price_usd.clone(),
					fetched_at: now,
				})
				.await?;
		}

		Ok(parsed.into_iter().collect())
	}
}

/// Extracts usable quotes from a `{id: {"usd": number}}` body. An id with a
/// missing or non-numeric quote yields no entry, and therefore no cache
/// write either.
fn parse_price_body(body: &serde_json::Value, requested: &[String]) -> Vec<(String, BigDecimal)> {
	requested
		.iter()
		.filter_map(|asset_id| {
			let quote = &body[asset_id.as_str()]["usd"];
			let number = quote.as_f64().filter(|n| n.is_finite())?;
			// Parse from the JSON text, not the f64, so the stored decimal
			// matches the provider's digits.
			let text = quote.to_string();
			let price = BigDecimal::from_str(&text)
				.unwrap_or_else(|_| BigDecimal::try_from(number).unwrap_or_default());
			Some((asset_id.clone(), price))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn parses_present_quotes_exactly() {
		let body = json!({
			"sol": { "usd": 142.37 },
			"bonk": { "usd": 0.0000251 },
		});
		let parsed =
			parse_price_body(&body, &["sol".to_string(), "bonk".to_string()]);

		let map: PriceMap = parsed.into_iter().collect();
		assert_eq!(map["sol"], BigDecimal::from_str("142.37").unwrap());
		assert_eq!(map["bonk"], BigDecimal::from_str("0.0000251").unwrap());
	}

	#[test]
	fn missing_and_malformed_quotes_are_dropped() {
		let body = json!({
			"sol": { "usd": 142.37 },
			"unknown-asset": {},
			"weird": { "usd": "not-a-number" },
		});
		let parsed = parse_price_body(
			&body,
			&["sol".to_string(), "unknown-asset".to_string(), "weird".to_string(), "absent".to_string()],
		);

		assert_eq!(parsed.len(), 1);
		assert_eq!(parsed[0].0, "sol");
	}
}
