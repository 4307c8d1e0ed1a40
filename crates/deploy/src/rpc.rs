//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::time::Duration;

use alloy_core::primitives::{Address, Bytes};
use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A failed JSON-RPC call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The request never produced a readable response (connection, timeout, HTTP layer).
    #[error("{method} request failed: {message}")]
    Transport { method: String, message: String },

    /// The node answered with a JSON-RPC error object.
    #[error("{method} returned error {code}: {message}")]
    Response {
        method: String,
        code: i64,
        message: String,
    },

    /// The node answered but the payload did not have the expected shape.
    #[error("failed to decode {method} result: {message}")]
    Decode { method: String, message: String },
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// A JSON-RPC endpoint bound to an HTTP client.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    url: Url,
}

impl RpcClient {
    pub fn new(url: Url) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client()?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Make a JSON-RPC call and deserialize the result.
    ///
    /// A `null` result deserializes into `Option::None` when `T` is an option, which is how
    /// `eth_getTransactionReceipt` reports a transaction that is not yet included.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let transport = |e: reqwest::Error| RpcError::Transport {
            method: method.to_string(),
            message: e.to_string(),
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(transport)?;

        let body: Value = response.json().await.map_err(transport)?;

        parse_response(method, body)
    }

    /// Deployed runtime code at `address`.
    pub async fn code_at(&self, address: Address) -> Result<Bytes, RpcError> {
        self.call(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    /// `eth_call` against the latest block.
    pub async fn read(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let request: Value = serde_json::json!({ "to": to, "data": data });
        self.call("eth_call", vec![request, serde_json::json!("latest")])
            .await
    }
}

/// Split a JSON-RPC response body into its result or error.
fn parse_response<T: DeserializeOwned>(method: &str, mut body: Value) -> Result<T, RpcError> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let error: ErrorObject =
            serde_json::from_value(error.clone()).unwrap_or_else(|_| ErrorObject {
                code: 0,
                message: error.to_string(),
            });
        return Err(RpcError::Response {
            method: method.to_string(),
            code: error.code,
            message: if error.message.is_empty() {
                "unknown".to_string()
            } else {
                error.message
            },
        });
    }

    let result = body
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| RpcError::Decode {
            method: method.to_string(),
            message: "no result in response".to_string(),
        })?;

    serde_json::from_value(result).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        message: e.to_string(),
    })
}

/// Deserialize a u64 from a hex quantity string (with 0x prefix).
pub fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

/// Deserialize an optional u64 hex quantity; missing or `null` yields `None`.
pub fn deserialize_opt_u64_from_hex<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    s.as_deref()
        .map(parse_hex_u64)
        .transpose()
        .map_err(serde::de::Error::custom)
}

pub fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_result() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x1f"});
        let value: String = parse_response("eth_chainId", body).unwrap();
        assert_eq!(parse_hex_u64(&value).unwrap(), 31);
    }

    #[test]
    fn test_parse_response_null_result_is_none() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": null});
        let value: Option<Value> = parse_response("eth_getTransactionReceipt", body).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_parse_response_error_object() {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "nonce too low"}
        });
        let err = parse_response::<String>("eth_sendRawTransaction", body).unwrap_err();
        assert_eq!(
            err,
            RpcError::Response {
                method: "eth_sendRawTransaction".to_string(),
                code: -32000,
                message: "nonce too low".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_response_missing_result() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1});
        let err = parse_response::<String>("eth_gasPrice", body).unwrap_err();
        assert!(matches!(err, RpcError::Decode { .. }));
    }
}
