//! HTTP JSON-RPC client for an Ethereum-style node.

use super::message::{
    RpcRequest, RpcResponse, METHOD_BLOCK_NUMBER, METHOD_GET_BLOCK_BY_NUMBER,
};
use super::{ChainClient, ClientError};
use crate::types::{format_quantity, parse_quantity, Block};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_http_client(http, url))
    }

    pub fn with_http_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one request and unwrap the envelope. A `null` result comes back
    /// as `Value::Null`.
    async fn call(&self, method: &'static str, params: Vec<Value>) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);

        let response = self.http.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let envelope: RpcResponse =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
                method,
                reason: format!("{} (body: {})", e, String::from_utf8_lossy(&bytes)),
            })?;

        if let Some(err) = envelope.error {
            return Err(ClientError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn latest_height(&self) -> Result<u64, ClientError> {
        let result = self.call(METHOD_BLOCK_NUMBER, Vec::new()).await?;
        match result {
            Value::String(hex) => Ok(parse_quantity(&hex)?),
            Value::Null => Err(ClientError::MissingResult(METHOD_BLOCK_NUMBER)),
            other => Err(ClientError::Decode {
                method: METHOD_BLOCK_NUMBER,
                reason: format!("expected hex string, got {}", other),
            }),
        }
    }

    async fn block_by_height(
        &self,
        height: u64,
        include_transactions: bool,
    ) -> Result<Option<Block>, ClientError> {
        let params = vec![
            Value::String(format_quantity(height)),
            Value::Bool(include_transactions),
        ];
        let result = self.call(METHOD_GET_BLOCK_BY_NUMBER, params).await?;
        if result.is_null() {
            return Ok(None);
        }

        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| ClientError::Decode {
                method: METHOD_GET_BLOCK_BY_NUMBER,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    /// Fake node: height 0x20, block 0x10 exists, anything higher is unmined,
    /// block 0xbad fails with an RPC error.
    async fn fake_node(Json(req): Json<Value>) -> (StatusCode, Json<Value>) {
        let id = req["id"].clone();
        let body = match req["method"].as_str() {
            Some("eth_blockNumber") => json!({"jsonrpc": "2.0", "id": id, "result": "0x20"}),
            Some("eth_getBlockByNumber") => match req["params"][0].as_str() {
                Some("0x10") => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "hash": "0xblock",
                        "number": "0x10",
                        "transactions": [{
                            "hash": "0xaa",
                            "from": "0x1111111111111111111111111111111111111111",
                            "to": "0x2222222222222222222222222222222222222222",
                            "value": "0x1"
                        }]
                    }
                }),
                Some("0xbad") => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32000, "message": "boom"}
                }),
                _ => json!({"jsonrpc": "2.0", "id": id, "result": null}),
            },
            _ => return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({}))),
        };
        (StatusCode::OK, Json(body))
    }

    async fn spawn_fake_node() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", post(fake_node));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_latest_height() {
        let client = JsonRpcClient::new(spawn_fake_node().await).unwrap();
        assert_eq!(client.latest_height().await.unwrap(), 0x20);
    }

    #[tokio::test]
    async fn test_block_found_and_not_yet_mined() {
        let client = JsonRpcClient::new(spawn_fake_node().await).unwrap();

        let block = client.block_by_height(0x10, true).await.unwrap().unwrap();
        assert_eq!(block.height().unwrap(), 0x10);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].hash, "0xaa");

        assert!(client.block_by_height(0x21, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces() {
        let client = JsonRpcClient::new(spawn_fake_node().await).unwrap();
        let err = client.block_by_height(0xbad, true).await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc { code: -32000, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = JsonRpcClient::new(format!("http://{}/", addr)).unwrap();
        let err = client.latest_height().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
