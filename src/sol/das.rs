//! Asset indexer (DAS) client: NFTs by owner, filtered to verified
//! collection memberships.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{constants::DAS_PAGE_LIMIT, rpc::JsonRpcClient};

#[derive(Clone)]
pub struct DasClient {
	rpc: JsonRpcClient,
}

#[derive(Debug, Deserialize)]
struct AssetsPage {
	#[serde(default)]
	items: Vec<DasAsset>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DasAsset {
	#[serde(default)]
	grouping: Vec<Grouping>,
	content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Grouping {
	group_key: Option<String>,
	group_value: Option<String>,
	verified: Option<bool>,
	collection_verified: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Content {
	metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
	collection: Option<MetadataCollection>,
}

#[derive(Debug, Deserialize)]
struct MetadataCollection {
	key: Option<String>,
	verified: Option<bool>,
}

impl DasAsset {
	/// The collection this asset verifiably belongs to, if any. Indexers
	/// disagree on where the verification flag lives, so both the grouping
	/// entry and the legacy metadata location are accepted; an asset with
	/// neither signal is skipped.
	pub fn verified_collection_key(&self) -> Option<&str> {
		for grouping in &self.grouping {
			if grouping.group_key.as_deref() == Some("collection")
				&& (grouping.verified == Some(true) || grouping.collection_verified == Some(true))
			{
				if let Some(value) = grouping.group_value.as_deref().filter(|v| !v.is_empty()) {
					return Some(value);
				}
			}
		}

		self.content
			.as_ref()
			.and_then(|content| content.metadata.as_ref())
			.and_then(|metadata| metadata.collection.as_ref())
			.filter(|collection| collection.verified == Some(true))
			.and_then(|collection| collection.key.as_deref())
			.filter(|key| !key.is_empty())
	}
}

impl DasClient {
	pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
		Self { rpc: JsonRpcClient::new(client, endpoint) }
	}

	/// One page of `getAssetsByOwner`. Pages are 1-indexed; a page shorter
	/// than `DAS_PAGE_LIMIT` is the last one.
	pub async fn assets_by_owner_page(&self, owner: &str, page: u64) -> Result<Vec<DasAsset>> {
		let response = self
			.rpc
			.call(
				"getAssetsByOwner",
				json!({
					"ownerAddress": owner,
					"page": page,
					"limit": DAS_PAGE_LIMIT,
				}),
			)
			.await?;

		let assets: AssetsPage =
			serde_json::from_value(response).context("Failed to parse getAssetsByOwner response")?;
		Ok(assets.items)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn asset(value: serde_json::Value) -> DasAsset {
		serde_json::from_value(value).unwrap()
	}

	#[test]
	fn verified_grouping_entry_counts() {
		let asset = asset(json!({
			"id": "asset-1",
			"grouping": [
				{ "group_key": "collection", "group_value": "C", "verified": true },
			],
		}));
		assert_eq!(asset.verified_collection_key(), Some("C"));
	}

	#[test]
	fn collection_verified_flag_counts() {
		let asset = asset(json!({
			"grouping": [
				{ "group_key": "collection", "group_value": "C", "collection_verified": true },
			],
		}));
		assert_eq!(asset.verified_collection_key(), Some("C"));
	}

	#[test]
	fn unverified_grouping_is_skipped() {
		let asset = asset(json!({
			"grouping": [
				{ "group_key": "collection", "group_value": "C", "verified": false },
			],
		}));
		assert_eq!(asset.verified_collection_key(), None);
	}

	#[test]
	fn metadata_collection_fallback() {
		let asset = asset(json!({
			"grouping": [],
			"content": {
				"metadata": {
					"collection": { "key": "C", "verified": true },
				},
			},
		}));
		assert_eq!(asset.verified_collection_key(), Some("C"));
	}

	#[test]
	fn metadata_collection_without_key_is_skipped() {
		let asset = asset(json!({
			"content": {
				"metadata": {
					"collection": { "key": "", "verified": true },
				},
			},
		}));
		assert_eq!(asset.verified_collection_key(), None);
	}

	#[test]
	fn asset_without_collection_is_skipped() {
		let asset = asset(json!({ "grouping": [{ "group_key": "creator", "group_value": "X" }] }));
		assert_eq!(asset.verified_collection_key(), None);
	}
}
