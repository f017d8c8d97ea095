//! Health reporting for the HTTP boundary
//!
//! Aggregates a queue connectivity check with any checks registered at
//! runtime. The `/health` and `/ready` routes in [`crate::api`] serve it.

use crate::observability::metrics::metrics;
use crate::queue::JobQueue;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

pub const HEALTHY: &str = "healthy";
pub const UNHEALTHY: &str = "unhealthy";
pub const DEGRADED: &str = "degraded";

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    pub fn healthy<S: Into<String>>(message: S) -> Self {
        Self {
            status: HEALTHY.to_string(),
            message: Some(message.into()),
            last_check: current_timestamp(),
        }
    }

    pub fn unhealthy<S: Into<String>>(message: S) -> Self {
        Self {
            status: UNHEALTHY.to_string(),
            message: Some(message.into()),
            last_check: current_timestamp(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HEALTHY
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub checks: BTreeMap<String, HealthCheck>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == HEALTHY
    }
}

/// Service health state
pub struct HealthMonitor {
    service: String,
    queue: Option<Arc<dyn JobQueue>>,
    additional_checks: RwLock<BTreeMap<String, HealthCheck>>,
}

impl HealthMonitor {
    pub fn new<S: Into<String>>(service: S) -> Self {
        Self {
            service: service.into(),
            queue: None,
            additional_checks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Include a queue connectivity check
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub async fn add_health_check(&self, name: String, check: HealthCheck) {
        self.additional_checks.write().await.insert(name, check);
    }

    pub async fn remove_health_check(&self, name: &str) {
        self.additional_checks.write().await.remove(name);
    }

    async fn check_queue(&self, queue: &dyn JobQueue) -> HealthCheck {
        match queue.counts().await {
            Ok(counts) => HealthCheck::healthy(format!(
                "{} waiting, {} active, {} failed",
                counts.waiting, counts.active, counts.failed
            )),
            Err(e) => HealthCheck::unhealthy(format!("Queue unreachable: {e}")),
        }
    }

    /// Run all checks; the service is degraded if any check is not healthy
    pub async fn get_health_status(&self) -> HealthStatus {
        let mut checks = BTreeMap::new();

        if let Some(queue) = &self.queue {
            checks.insert("queue".to_string(), self.check_queue(queue.as_ref()).await);
        }

        for (name, check) in self.additional_checks.read().await.iter() {
            checks.insert(name.clone(), check.clone());
        }

        let status = if checks.values().all(HealthCheck::is_healthy) {
            HEALTHY
        } else {
            DEGRADED
        };

        HealthStatus {
            status: status.to_string(),
            service: self.service.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: current_timestamp(),
            uptime_seconds: metrics().get_metrics().uptime_seconds,
            checks,
        }
    }

    /// Ready when the queue, if any, answers
    pub async fn is_ready(&self) -> bool {
        match &self.queue {
            Some(queue) => queue.counts().await.is_ok(),
            None => true,
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
