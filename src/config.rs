//! Service configuration
//!
//! Loaded from a TOML file (`agentdeploy.toml` by default). Secrets are never
//! stored in the file: sections name the environment variable that holds
//! them (`token_env`) and the value is read when the client is built.

use crate::content::cache::DEFAULT_CACHE_TTL;
use crate::queue::{QueueSettings, WorkerPoolConfig};
use crate::registry::{RegistrySettings, AGENT_REGISTERED_TOPIC};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub content_store: ContentStoreSection,
    pub registry: RegistrySection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub queue: QueueSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Listen address for the HTTP API
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Run the worker pool inside the server process
    #[serde(default)]
    pub in_process_worker: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            in_process_worker: false,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4000".to_string()
}

/// Content store backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentBackendKind {
    #[default]
    Http,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentStoreSection {
    #[serde(default)]
    pub backend: ContentBackendKind,
    /// Upload API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// IPFS HTTP gateway base URL
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Environment variable containing the upload token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_content_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for ContentStoreSection {
    fn default() -> Self {
        Self {
            backend: ContentBackendKind::default(),
            api_url: default_api_url(),
            gateway_url: default_gateway_url(),
            token_env: default_token_env(),
            timeout_ms: default_content_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.web3.storage".to_string()
}

fn default_gateway_url() -> String {
    "https://w3s.link".to_string()
}

fn default_token_env() -> String {
    "WEB3_STORAGE_TOKEN".to_string()
}

fn default_content_timeout_ms() -> u64 {
    30_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrySection {
    /// Ethereum JSON-RPC endpoint
    pub rpc_url: String,
    /// Registry contract address
    pub contract_address: String,
    /// Sending account, managed by the node
    pub from_address: String,
    pub gas_limit: Option<u64>,
    #[serde(default = "default_rpc_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Override for the registration event topic
    pub event_topic: Option<String>,
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_confirmation_timeout_ms() -> u64 {
    120_000
}

fn default_poll_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSection {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("agentdeploy.db")
}

/// Job queue backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    #[serde(default)]
    pub backend: QueueBackendKind,
    /// Queue database file; defaults to the agent database
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Seconds a job may stay active before it is redelivered
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::default(),
            path: None,
            max_attempts: default_max_attempts(),
            workers: default_workers(),
            poll_interval_ms: default_queue_poll_interval_ms(),
            lease_secs: default_lease_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_workers() -> usize {
    2
}

fn default_queue_poll_interval_ms() -> u64 {
    1000
}

fn default_lease_secs() -> u64 {
    300
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeployConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DeployConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if self.content_store.backend == ContentBackendKind::Http {
            validate_url("content_store.api_url", &self.content_store.api_url)?;
            validate_url("content_store.gateway_url", &self.content_store.gateway_url)?;
        }
        if self.content_store.retry_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "content_store.retry_attempts must be at least 1".to_string(),
            ));
        }

        validate_url("registry.rpc_url", &self.registry.rpc_url)?;
        validate_address("registry.contract_address", &self.registry.contract_address)?;
        validate_address("registry.from_address", &self.registry.from_address)?;
        if let Some(topic) = &self.registry.event_topic {
            validate_hex("registry.event_topic", topic, 64)?;
        }

        if self.queue.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.queue.workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue.workers must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind.parse().map_err(|e| {
            ConfigError::InvalidConfig(format!("server.bind {:?}: {e}", self.server.bind))
        })
    }

    /// Upload token for the HTTP content store
    pub fn get_content_token(&self) -> Result<String, ConfigError> {
        std::env::var(&self.content_store.token_env)
            .map_err(|_| ConfigError::EnvVarNotFound(self.content_store.token_env.clone()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.content_store.retry_attempts,
            Duration::from_millis(self.content_store.retry_base_delay_ms),
        )
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.content_store.cache_ttl_secs)
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            event_topic: self
                .registry
                .event_topic
                .clone()
                .unwrap_or_else(|| AGENT_REGISTERED_TOPIC.to_string()),
            confirmation_timeout: Duration::from_millis(self.registry.confirmation_timeout_ms),
            poll_interval: Duration::from_millis(self.registry.poll_interval_ms),
            read_retry: self.retry_policy(),
        }
    }

    pub fn queue_path(&self) -> &Path {
        self.queue.path.as_deref().unwrap_or(&self.database.path)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_attempts: self.queue.max_attempts,
        }
    }

    pub fn worker_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            concurrency: self.queue.workers,
            poll_interval: Duration::from_millis(self.queue.poll_interval_ms),
            lease: Duration::from_secs(self.queue.lease_secs),
            ..WorkerPoolConfig::default()
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[content_store]
backend = "memory"

[registry]
rpc_url = "http://127.0.0.1:8545"
contract_address = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
from_address = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"

[queue]
backend = "memory"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::InvalidConfig(format!("{field} {value:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::InvalidConfig(format!(
            "{field} must be http or https, got {scheme}"
        ))),
    }
}

fn validate_hex(field: &str, value: &str, digits: usize) -> Result<(), ConfigError> {
    let valid = value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == digits && hex.bytes().all(|b| b.is_ascii_hexdigit()));

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidConfig(format!(
            "{field} must be 0x followed by {digits} hex digits"
        )))
    }
}

fn validate_address(field: &str, value: &str) -> Result<(), ConfigError> {
    validate_hex(field, value, 40)
}
