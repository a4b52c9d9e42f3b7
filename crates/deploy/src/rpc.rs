//! JSON-RPC 2.0 transport to an EVM node.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Default timeout for a single RPC request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    result: Option<Value>,
    error: Option<RpcError>,
}

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    /// Revert payload for failed `eth_call`/`eth_estimateGas`, when the node returns one.
    #[serde(default)]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(data) = &self.data {
            write!(f, ", data: {}", data)?;
        }
        Ok(())
    }
}

/// Issue `method` with `params` and deserialize its result.
///
/// A node-side error, including a revert, fails with the node's message.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let request = Request {
        jsonrpc: "2.0",
        id: 1,
        method,
        params,
    };
    tracing::trace!(method, url, "JSON-RPC request");

    let response: Response = client
        .post(url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to send {} request to {}", method, url))?
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    decode_response(method, response)
}

pub(crate) fn decode_response<T: DeserializeOwned>(
    method: &str,
    response: Response,
) -> anyhow::Result<T> {
    if let Some(error) = response.error {
        anyhow::bail!("RPC error from {}: {}", method, error);
    }

    // `null` is a legitimate result (e.g. a receipt that does not exist yet).
    let result = response.result.unwrap_or(Value::Null);
    serde_json::from_value(result)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Parse a hex quantity (`0x`-prefixed) into a u64.
pub fn parse_hex_u64(value: &str) -> Result<u64, anyhow::Error> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: '{}'", value))
}

/// Deserialize a u64 from a hex string (with 0x prefix).
pub fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}
