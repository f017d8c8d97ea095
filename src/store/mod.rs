//! Persistence store for agent records
//!
//! An [`AgentRecord`] is written once per successful pipeline run and never
//! updated. There is no upsert: inserting the same agent twice yields two
//! rows, and deduplication is up to the caller.

pub mod sqlite;

pub use sqlite::SqliteAgentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),
}

/// Persisted agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    /// Store-assigned primary key
    pub id: i64,
    pub owner: Option<String>,
    pub cid: String,
    pub name: Option<String>,
    pub tx_hash: String,
    /// Identifier assigned by the registry contract, if it could be read
    pub chain_agent_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Fields of an agent record before the store assigns an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAgentRecord {
    pub owner: Option<String>,
    pub cid: String,
    pub name: Option<String>,
    pub tx_hash: String,
    pub chain_agent_id: Option<u64>,
}

/// Durable agent storage
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Insert a record and return it with its assigned id
    async fn insert(&self, record: NewAgentRecord) -> Result<AgentRecord, PersistenceError>;

    /// Point lookup; `Ok(None)` when no record has this id
    async fn get_by_id(&self, id: i64) -> Result<Option<AgentRecord>, PersistenceError>;
}
