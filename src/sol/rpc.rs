//! Chain RPC client: parsed SPL token accounts by owner.

use std::{collections::BTreeMap, str::FromStr};

use anyhow::{anyhow, Context, Result};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{constants::SPL_TOKEN_PROGRAM_ID, rpc::JsonRpcClient};

#[derive(Clone)]
pub struct SolRpcClient {
	rpc: JsonRpcClient,
}

#[derive(Debug, Deserialize)]
struct TokenAccountsResponse {
	value: Vec<KeyedAccount>,
}

#[derive(Debug, Deserialize)]
struct KeyedAccount {
	account: Account,
}

#[derive(Debug, Deserialize)]
struct Account {
	data: AccountData,
}

#[derive(Debug, Deserialize)]
struct AccountData {
	parsed: ParsedData,
}

#[derive(Debug, Deserialize)]
struct ParsedData {
	info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
struct TokenAccountInfo {
	mint: String,
	#[serde(rename = "tokenAmount")]
	token_amount: TokenAmount,
}

#[derive(Debug, Deserialize)]
struct TokenAmount {
	#[serde(rename = "uiAmountString")]
	ui_amount_string: Option<String>,
}

impl SolRpcClient {
	pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
		Self { rpc: JsonRpcClient::new(client, endpoint) }
	}

	/// UI-scaled balances summed per mint across every token account the
	/// wallet owns. Zero balances and duplicate accounts per mint are both
	/// legitimate; duplicates are summed.
	pub async fn token_balances_by_mint(
		&self,
		owner: &str,
	) -> Result<BTreeMap<String, BigDecimal>> {
		let response = self
			.rpc
			.call(
				"getTokenAccountsByOwner",
				json!([
					owner,
					{ "programId": SPL_TOKEN_PROGRAM_ID },
					{ "encoding": "jsonParsed" },
				]),
			)
			.await?;

		let accounts: TokenAccountsResponse = serde_json::from_value(response)
			.context("Failed to parse getTokenAccountsByOwner response")?;

		aggregate_balances(accounts)
	}
}

fn aggregate_balances(accounts: TokenAccountsResponse) -> Result<BTreeMap<String, BigDecimal>> {
	let mut balances: BTreeMap<String, BigDecimal> = BTreeMap::new();

	for keyed in accounts.value {
		let info = keyed.account.data.parsed.info;
		let raw = info.token_amount.ui_amount_string.unwrap_or_else(|| "0".to_string());
		let amount = BigDecimal::from_str(&raw)
			.map_err(|_| anyhow!("Unparseable token amount {raw:?} for mint {}", info.mint))?;
		*balances.entry(info.mint).or_default() += amount;
	}

	Ok(balances)
}
