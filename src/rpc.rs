//! Shared JSON-RPC 2.0 plumbing for the chain RPC and the asset indexer.

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

#[derive(Clone, Debug, Deserialize)]
pub struct RpcErrorObject {
	pub code: i64,
	pub message: String,
}

#[derive(Error, Debug)]
pub enum RpcError {
	#[error("transport error: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("JSON decode error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("RPC error response ({}): {}", .0.code, .0.message)]
	Rpc(RpcErrorObject),
	#[error("RPC response was not a JSON object")]
	MalformedResponse,
}

/// One JSON-RPC endpoint. The inner reqwest client is shared (it is
/// internally reference counted), so cloning this is cheap.
#[derive(Clone)]
pub struct JsonRpcClient {
	client: reqwest::Client,
	endpoint: Url,
}

impl JsonRpcClient {
	pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
		Self { client, endpoint }
	}

	/// Posts a single JSON-RPC call and returns the `result` value.
	pub async fn call(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, RpcError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": 0,
			"method": method,
			"params": params,
		});

		let response = self
			.client
			.post(self.endpoint.clone())
			.header(CONTENT_TYPE, "application/json")
			.json(&request_body)
			.send()
			.await?
			.error_for_status()?;

		let mut body = response.json::<serde_json::Value>().await?;

		if !body.is_object() {
			return Err(RpcError::MalformedResponse);
		}
		if body["error"].is_object() {
			return Err(RpcError::Rpc(serde_json::from_value(body["error"].take())?));
		}
		Ok(body["result"].take())
	}
}
