//! On-chain agent registry client
//!
//! Registers a CID with the registry contract, waits for the transaction to
//! be mined and pulls the assigned agent id out of the `AgentRegistered`
//! event.
//!
//! Registration is state-mutating and is never retried here. A mined
//! transaction without the expected event is a partial success: the receipt
//! comes back with `agent_id: None` and can be reconciled later with
//! [`RegistryClient::reconcile`].

pub mod abi;
pub mod rpc;

pub use abi::AGENT_REGISTERED_TOPIC;
pub use rpc::{JsonRpcRegistry, JsonRpcRegistryConfig};

use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Chain errors; none of them are retried by the registry client
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Transaction {tx_hash} not confirmed within {waited:?}")]
    Unconfirmed { tx_hash: String, waited: Duration },

    #[error("Transaction {tx_hash} is not mined yet")]
    Pending { tx_hash: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// Hash of the transaction involved, when one was already submitted
    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            ChainError::Reverted { tx_hash }
            | ChainError::Unconfirmed { tx_hash, .. }
            | ChainError::Pending { tx_hash } => Some(tx_hash),
            _ => None,
        }
    }
}

/// One event log entry as reported in a transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

/// Mined transaction receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: Option<u64>,
    /// False when the transaction reverted
    pub success: bool,
    pub logs: Vec<LogEntry>,
}

/// Result of a registration: the transaction hash and, if the event was
/// found, the id the registry assigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReceipt {
    pub tx_hash: String,
    pub agent_id: Option<u64>,
}

impl RegistrationReceipt {
    /// Registered on chain but no id could be read from the logs
    pub fn is_unindexed(&self) -> bool {
        self.agent_id.is_none()
    }
}

/// Pull the agent id out of the first log emitted by `contract` whose first
/// topic is `event_topic`.
///
/// The id is read from the first indexed argument when present, otherwise
/// from the first word of the log data. Ids that do not fit in a u64 are
/// treated as missing.
pub fn extract_agent_id(logs: &[LogEntry], contract: &str, event_topic: &str) -> Option<u64> {
    let log = logs.iter().find(|log| {
        log.address.eq_ignore_ascii_case(contract)
            && log
                .topics
                .first()
                .is_some_and(|topic| topic.eq_ignore_ascii_case(event_topic))
    })?;

    match log.topics.get(1) {
        Some(indexed) => abi::decode_u64_word(indexed),
        None => abi::first_data_word(&log.data).and_then(abi::decode_u64_word),
    }
}

/// Chain access behind the client
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Address of the registry contract; only its events are decoded
    fn contract_address(&self) -> &str;

    /// Send `registerAgent(cid)` and return the transaction hash
    async fn submit_registration(&self, cid: &str) -> Result<String, ChainError>;

    /// Receipt of a mined transaction, or `None` while it is pending
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>, ChainError>;
}

/// Confirmation and event settings for [`RegistryClient`]
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Topic of the registration event
    pub event_topic: String,
    /// Upper bound on waiting for a transaction to be mined
    pub confirmation_timeout: Duration,
    /// Delay between receipt polls
    pub poll_interval: Duration,
    /// Retry policy for read-only receipt lookups in `reconcile`
    pub read_retry: RetryPolicy,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            event_topic: AGENT_REGISTERED_TOPIC.to_string(),
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            read_retry: RetryPolicy::default(),
        }
    }
}

/// Registry client
#[derive(Clone)]
pub struct RegistryClient {
    backend: Arc<dyn RegistryBackend>,
    settings: RegistrySettings,
}

impl RegistryClient {
    pub fn new(backend: Arc<dyn RegistryBackend>, settings: RegistrySettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Register a CID and wait for confirmation.
    ///
    /// Returns `agent_id: None` rather than an error when the transaction
    /// was mined but the registration event is absent.
    pub async fn register(&self, cid: &str) -> Result<RegistrationReceipt, ChainError> {
        let tx_hash = self.backend.submit_registration(cid).await?;
        info!(cid, tx_hash = %tx_hash, backend = self.backend.name(), "Registration submitted");

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        self.to_registration(receipt)
    }

    /// Re-read a mined registration and extract its id again.
    ///
    /// Read-only, so transient lookup failures are retried with backoff.
    pub async fn reconcile(&self, tx_hash: &str) -> Result<RegistrationReceipt, ChainError> {
        let receipt = retry_with_backoff(self.settings.read_retry, "registry.reconcile", || {
            self.backend.get_receipt(tx_hash)
        })
        .await
        .map_err(|e| e.into_last())?
        .ok_or_else(|| ChainError::Pending {
            tx_hash: tx_hash.to_string(),
        })?;

        self.to_registration(receipt)
    }

    fn to_registration(&self, receipt: TransactionReceipt) -> Result<RegistrationReceipt, ChainError> {
        if !receipt.success {
            return Err(ChainError::Reverted {
                tx_hash: receipt.transaction_hash,
            });
        }

        let agent_id = extract_agent_id(
            &receipt.logs,
            self.backend.contract_address(),
            &self.settings.event_topic,
        );
        match agent_id {
            Some(id) => info!(tx_hash = %receipt.transaction_hash, agent_id = id, "Agent registered"),
            None => warn!(
                tx_hash = %receipt.transaction_hash,
                "Transaction mined without a registration event; agent is unindexed"
            ),
        }

        Ok(RegistrationReceipt {
            tx_hash: receipt.transaction_hash,
            agent_id,
        })
    }

    /// Poll for the receipt until it appears or the confirmation timeout passes.
    /// Transport hiccups while polling are logged and polling continues.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt, ChainError> {
        let poll = async {
            loop {
                match self.backend.get_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {}
                    Err(ChainError::Transport(e)) => {
                        warn!(tx_hash, error = %e, "Receipt poll failed, polling again");
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        };

        tokio::time::timeout(self.settings.confirmation_timeout, poll)
            .await
            .map_err(|_| ChainError::Unconfirmed {
                tx_hash: tx_hash.to_string(),
                waited: self.settings.confirmation_timeout,
            })?
    }
}
