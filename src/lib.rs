//! Agent deployment pipeline
//!
//! Turns an agent configuration into a deployed agent: the configuration is
//! pinned to content-addressed storage, its CID is registered with an
//! on-chain registry contract, the composite result is persisted, and an
//! initial execution job is queued for a worker pool.
//!
//! # Overview
//!
//! - [`content`]: pin and fetch documents by CID, with a TTL cache and retry
//! - [`registry`]: submit registrations and read the assigned agent id from
//!   the `AgentRegistered` event
//! - [`store`]: durable agent records (SQLite)
//! - [`queue`]: durable job queue with at-least-once delivery and a worker pool
//! - [`pipeline`]: the `validate → pin → register → persist → enqueue`
//!   orchestrator and its partial-failure reporting
//! - [`api`]: warp routes over the pipeline
//!
//! # Quick Start
//!
//! ```rust
//! use agentdeploy::content::{ContentCache, ContentClient, MemoryContentStore};
//! use agentdeploy::pipeline::{AgentPipeline, CreateAgentRequest};
//! use agentdeploy::queue::MemoryJobQueue;
//! use agentdeploy::registry::{RegistryClient, RegistrySettings};
//! use agentdeploy::retry::RetryPolicy;
//! use agentdeploy::store::SqliteAgentStore;
//! use agentdeploy::testing::MockRegistry;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let content = ContentClient::new(
//!     Arc::new(MemoryContentStore::new()),
//!     Arc::new(ContentCache::default()),
//!     RetryPolicy::default(),
//! );
//! let registry = RegistryClient::new(Arc::new(MockRegistry::new()), RegistrySettings::default());
//! let pipeline = AgentPipeline::new(
//!     content,
//!     registry,
//!     Arc::new(SqliteAgentStore::in_memory()?),
//!     Arc::new(MemoryJobQueue::new()),
//! );
//!
//! let created = pipeline
//!     .create_agent(CreateAgentRequest {
//!         name: Some("Bot A".to_string()),
//!         config: Some(json!({"modules": ["PriceFeed", "Notifier"], "trigger": "cron"})),
//!         owner: Some("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string()),
//!     })
//!     .await?;
//! assert_eq!(created.agent_id, Some(1));
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod content;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod store;
pub mod testing;

pub use config::DeployConfig;
pub use error::{DeployError, DeployResult, ErrorKind};
pub use pipeline::{AgentConfig, AgentPipeline, CreateAgentRequest, CreatedAgent, PipelineFailure, Stage};
pub use queue::{Job, JobPayload, JobQueue, JobState, WorkerPool};
pub use registry::RegistrationReceipt;
pub use store::{AgentRecord, AgentStore};
