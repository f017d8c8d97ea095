//! Ethereum JSON-RPC registry backend
//!
//! Talks to an RPC node over HTTP. Transactions are sent with
//! `eth_sendTransaction` from an account the node manages (a dev node or a
//! signing proxy), so no key material lives in this process. Receipts are
//! read with `eth_getTransactionReceipt`.

use super::abi;
use super::{ChainError, LogEntry, RegistryBackend, TransactionReceipt};
use crate::config::RegistrySection;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Connection settings for [`JsonRpcRegistry`]
#[derive(Debug, Clone)]
pub struct JsonRpcRegistryConfig {
    pub rpc_url: String,
    /// Registry contract address
    pub contract_address: String,
    /// Sending account, unlocked on the node
    pub from_address: String,
    /// Optional gas limit; the node estimates when absent
    pub gas_limit: Option<u64>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl JsonRpcRegistryConfig {
    pub fn from_section(section: &RegistrySection) -> Self {
        Self {
            rpc_url: section.rpc_url.clone(),
            contract_address: section.contract_address.clone(),
            from_address: section.from_address.clone(),
            gas_limit: section.gas_limit,
            timeout: Duration::from_millis(section.request_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<String>,
    /// Absent on pre-Byzantium chains, where it is treated as success
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    logs: Vec<LogEntry>,
}

impl From<RpcReceipt> for TransactionReceipt {
    fn from(raw: RpcReceipt) -> Self {
        let success = raw
            .status
            .as_deref()
            .and_then(abi::parse_quantity)
            .map(|status| status == 1)
            .unwrap_or(true);

        TransactionReceipt {
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number.as_deref().and_then(abi::parse_quantity),
            success,
            logs: raw.logs,
        }
    }
}

/// Registry reached through an Ethereum JSON-RPC endpoint
#[derive(Debug)]
pub struct JsonRpcRegistry {
    config: JsonRpcRegistryConfig,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcRegistry {
    pub fn new(config: JsonRpcRegistryConfig) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChainError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "JSON-RPC call");

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::Transport(format!(
                        "{method} timed out after {:?}",
                        self.config.timeout
                    ))
                } else {
                    ChainError::Transport(format!("{method} request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!(
                "{method} returned HTTP status {status}"
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(format!("{method}: {e}")))?;

        if let Some(error) = body.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl RegistryBackend for JsonRpcRegistry {
    fn name(&self) -> &str {
        "json-rpc"
    }

    fn contract_address(&self) -> &str {
        &self.config.contract_address
    }

    async fn submit_registration(&self, cid: &str) -> Result<String, ChainError> {
        let mut transaction = json!({
            "from": self.config.from_address,
            "to": self.config.contract_address,
            "data": abi::encode_register_agent(cid),
        });
        if let Some(gas) = self.config.gas_limit {
            transaction["gas"] = json!(format!("0x{gas:x}"));
        }

        let result = self.call("eth_sendTransaction", json!([transaction])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::InvalidResponse(format!("expected a transaction hash, got {result}")))
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>, ChainError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        if result.is_null() {
            return Ok(None);
        }

        let receipt: RpcReceipt = serde_json::from_value(result)
            .map_err(|e| ChainError::InvalidResponse(format!("malformed receipt: {e}")))?;
        Ok(Some(receipt.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AGENT_REGISTERED_TOPIC;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TX: &str = "0x8f1b5e2c0f7a1cbb3a6a1a0b7b9c2e5f3d4c6b8a9e0f1d2c3b4a5968778695a4";

    fn registry_for(server: &MockServer) -> JsonRpcRegistry {
        JsonRpcRegistry::new(JsonRpcRegistryConfig {
            rpc_url: server.uri(),
            contract_address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string(),
            from_address: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string(),
            gas_limit: Some(300_000),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_sends_encoded_call() {
        let server = MockServer::start().await;
        let cid = "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq";

        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_sendTransaction",
                "params": [{
                    "to": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                    "data": abi::encode_register_agent(cid),
                    "gas": "0x493e0",
                }]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": TX})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tx_hash = registry_for(&server).submit_registration(cid).await.unwrap();
        assert_eq!(tx_hash, TX);
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32000, "message": "execution reverted"}
            })))
            .mount(&server)
            .await;

        let err = registry_for(&server)
            .submit_registration("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG")
            .await
            .unwrap_err();

        assert!(matches!(err, ChainError::Rpc { code: -32000, .. }));
    }

    #[tokio::test]
    async fn test_pending_receipt_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getTransactionReceipt"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": null})),
            )
            .mount(&server)
            .await;

        assert!(registry_for(&server).get_receipt(TX).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receipt_parsing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getTransactionReceipt",
                "params": [TX]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "transactionHash": TX,
                    "blockNumber": "0x10",
                    "status": "0x1",
                    "logs": [{
                        "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                        "topics": [AGENT_REGISTERED_TOPIC, format!("0x{:064x}", 5)],
                        "data": "0x",
                        "logIndex": "0x0"
                    }]
                }
            })))
            .mount(&server)
            .await;

        let receipt = registry_for(&server).get_receipt(TX).await.unwrap().unwrap();
        assert_eq!(receipt.transaction_hash, TX);
        assert_eq!(receipt.block_number, Some(16));
        assert!(receipt.success);
        assert_eq!(
            crate::registry::extract_agent_id(
                &receipt.logs,
                "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                AGENT_REGISTERED_TOPIC
            ),
            Some(5)
        );
    }

    #[tokio::test]
    async fn test_reverted_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"transactionHash": TX, "blockNumber": "0x2", "status": "0x0", "logs": []}
            })))
            .mount(&server)
            .await;

        let receipt = registry_for(&server).get_receipt(TX).await.unwrap().unwrap();
        assert!(!receipt.success);
    }

    #[tokio::test]
    async fn test_http_failure_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = registry_for(&server).get_receipt(TX).await.unwrap_err();
        assert!(matches!(err, ChainError::Transport(_)));
    }
}
