//! Minimal JSON-RPC 2.0 client over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{HarnessError, Result};

/// Per-request timeout; readiness waits impose their own overall bound.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// A JSON-RPC endpoint of a node.
#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    next_id: std::sync::Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: Default::default(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and deserialize its `result`.
    ///
    /// A `null` result deserializes into `Option::None` when `T` is an option.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response: Response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(self.rpc_error(method, format!("{} (code {})", err.message, err.code)));
        }

        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| self.rpc_error(method, e.to_string()))
    }

    /// True once the endpoint answers any well-formed JSON-RPC response to
    /// `method`, including an error object.
    pub async fn is_reachable(&self, method: &str) -> bool {
        match self.call::<Value>(method, json!([])).await {
            Ok(_) | Err(HarnessError::Rpc { .. }) => true,
            Err(e) => {
                tracing::trace!(url = %self.url, "not reachable: {e}");
                false
            }
        }
    }

    /// `net_peerCount`, decoded from its hex quantity.
    pub async fn peer_count(&self) -> Result<u64> {
        let count: String = self.call("net_peerCount", json!([])).await?;
        self.quantity("net_peerCount", &count)
    }

    /// `eth_blockNumber`, decoded from its hex quantity.
    pub async fn block_number(&self) -> Result<u64> {
        let number: String = self.call("eth_blockNumber", json!([])).await?;
        self.quantity("eth_blockNumber", &number)
    }

    /// `eth_getTransactionReceipt`; `None` until the transaction is mined.
    pub async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Value>> {
        self.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }

    fn quantity(&self, method: &str, hex_value: &str) -> Result<u64> {
        parse_quantity(hex_value).ok_or_else(|| {
            self.rpc_error(method, format!("invalid hex quantity {hex_value:?}"))
        })
    }

    fn rpc_error(&self, method: &str, message: String) -> HarnessError {
        HarnessError::Rpc {
            url: self.url.clone(),
            method: method.to_string(),
            message,
        }
    }
}

/// Parse an Ethereum hex quantity such as `"0x1a"`.
pub fn parse_quantity(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0"), Some(0));
        assert_eq!(parse_quantity("0x1a"), Some(26));
        assert_eq!(parse_quantity("0X10"), Some(16));
        assert_eq!(parse_quantity("0x"), None);
        assert_eq!(parse_quantity("1a"), None);
        assert_eq!(parse_quantity("0xzz"), None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        // Bind and drop to get a port with nothing listening.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = RpcClient::new(format!("http://127.0.0.1:{port}")).unwrap();

        assert!(!client.is_reachable("eth_blockNumber").await);
        assert!(matches!(
            client.block_number().await,
            Err(HarnessError::Http(_))
        ));
    }
}
