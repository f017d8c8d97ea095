//! Test helpers and utilities for integration tests

use agentdeploy::content::{ContentCache, ContentClient};
use agentdeploy::pipeline::{AgentPipeline, CreateAgentRequest};
use agentdeploy::registry::{RegistryClient, RegistrySettings, AGENT_REGISTERED_TOPIC};
use agentdeploy::retry::RetryPolicy;
use agentdeploy::testing::{FlakyContentBackend, MockAgentStore, MockJobQueue, MockRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[allow(dead_code)]
pub const OWNER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

/// Registry settings that confirm quickly against the mock chain
#[allow(dead_code)]
pub fn fast_registry_settings() -> RegistrySettings {
    RegistrySettings {
        event_topic: AGENT_REGISTERED_TOPIC.to_string(),
        confirmation_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(5),
        read_retry: RetryPolicy::new(2, Duration::from_millis(5)),
    }
}

/// The "Bot A" request used across scenarios
#[allow(dead_code)]
pub fn bot_a_request() -> CreateAgentRequest {
    CreateAgentRequest {
        name: Some("Bot A".to_string()),
        config: Some(json!({
            "modules": ["PriceFeed", "Notifier"],
            "trigger": "cron"
        })),
        owner: Some(OWNER.to_string()),
    }
}

/// A pipeline over mock collaborators, with handles to inspect them
#[allow(dead_code)]
pub struct Harness {
    pub content: Arc<FlakyContentBackend>,
    pub registry: Arc<MockRegistry>,
    pub store: Arc<MockAgentStore>,
    pub queue: Arc<MockJobQueue>,
    pub pipeline: AgentPipeline,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Total calls made to any external collaborator
    pub fn external_calls(&self) -> usize {
        self.content.calls()
            + self.registry.submission_count()
            + self.registry.receipt_calls()
            + self.store.insert_calls()
            + self.queue.enqueue_calls()
    }
}

#[allow(dead_code)]
#[derive(Default)]
pub struct HarnessBuilder {
    content: Option<FlakyContentBackend>,
    registry: Option<MockRegistry>,
    store: Option<MockAgentStore>,
    queue: Option<MockJobQueue>,
    retry: Option<RetryPolicy>,
}

#[allow(dead_code)]
impl HarnessBuilder {
    pub fn content(mut self, content: FlakyContentBackend) -> Self {
        self.content = Some(content);
        self
    }

    pub fn registry(mut self, registry: MockRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn store(mut self, store: MockAgentStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn queue(mut self, queue: MockJobQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> Harness {
        let content = Arc::new(self.content.unwrap_or_default());
        let registry = Arc::new(self.registry.unwrap_or_default());
        let store = Arc::new(self.store.unwrap_or_default());
        let queue = Arc::new(self.queue.unwrap_or_default());

        let client = ContentClient::new(
            content.clone(),
            Arc::new(ContentCache::default()),
            self.retry
                .unwrap_or_else(|| RetryPolicy::new(3, Duration::from_millis(5))),
        );
        let pipeline = AgentPipeline::new(
            client,
            RegistryClient::new(registry.clone(), fast_registry_settings()),
            store.clone(),
            queue.clone(),
        );

        Harness {
            content,
            registry,
            store,
            queue,
            pipeline,
        }
    }
}
