//! Job queue and worker pool
//!
//! Jobs move `waiting → active → completed | failed`. A failed attempt goes
//! back to `waiting` until `max_attempts` is reached. Jobs stuck in `active`
//! past their lease (a crashed worker) are put back by
//! [`JobQueue::requeue_stale`], so a job can be delivered more than once and
//! handlers must tolerate that. A lease that expires on the last allowed
//! attempt fails the job instead.

pub mod handlers;
pub mod memory;
pub mod sqlite;
pub mod worker;

pub use handlers::InitialRunHandler;
pub use memory::MemoryJobQueue;
pub use sqlite::SqliteJobQueue;
pub use worker::{JobHandler, JobOutcome, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Name of the job enqueued after an agent is created
pub const INITIAL_RUN_JOB: &str = "initial-run";

/// `last_error` of a job whose final delivery was never reported back
pub const LEASE_EXPIRED: &str = "lease expired";

/// Queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Job payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} is {state}, expected active")]
    NotActive { job_id: String, state: JobState },

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    /// No further transitions happen from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the first execution of a newly created agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialRun {
    /// Persisted record id of the agent
    pub agent_id: i64,
    pub cid: String,
    pub owner: Option<String>,
}

/// Job payloads, tagged by job name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload")]
pub enum JobPayload {
    #[serde(rename = "initial-run")]
    InitialRun(InitialRun),
}

impl JobPayload {
    pub fn name(&self) -> &'static str {
        match self {
            JobPayload::InitialRun(_) => INITIAL_RUN_JOB,
        }
    }
}

/// A queued job and its bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(flatten)]
    pub payload: JobPayload,
    pub state: JobState,
    /// Number of deliveries so far
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobPayload, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            state: JobState::Waiting,
            attempts: 0,
            max_attempts,
            last_error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn name(&self) -> &'static str {
        self.payload.name()
    }

    /// State after a failed attempt: back to waiting while attempts remain
    pub fn state_after_failure(&self) -> JobState {
        if self.attempts >= self.max_attempts {
            JobState::Failed
        } else {
            JobState::Waiting
        }
    }
}

/// Per-state job counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Queue behaviour shared by the backends
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// Deliveries before a job is terminally failed
    pub max_attempts: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Durable job queue with at-least-once delivery
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job in `waiting` and return its id
    async fn enqueue(&self, payload: JobPayload) -> Result<String, QueueError>;

    /// Claim the oldest waiting job, marking it `active` and counting the attempt
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    /// Mark an active job completed with its result
    async fn complete(&self, job_id: &str, result: Value) -> Result<(), QueueError>;

    /// Record a failed attempt; returns the state the job moved to
    async fn fail(&self, job_id: &str, error: &str) -> Result<JobState, QueueError>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError>;

    /// Release jobs that have been active for at least `lease`: back to
    /// waiting while attempts remain, otherwise failed. Returns the number
    /// of jobs released.
    async fn requeue_stale(&self, lease: Duration) -> Result<usize, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;
}

/// Cut-off for [`JobQueue::requeue_stale`]
pub(crate) fn lease_cutoff(lease: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::weeks(52));
    Utc::now() - lease
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn initial_run() -> JobPayload {
        JobPayload::InitialRun(InitialRun {
            agent_id: 42,
            cid: "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG".to_string(),
            owner: Some("0xabc".to_string()),
        })
    }

    #[test]
    fn test_payload_is_tagged_by_name() {
        let value = serde_json::to_value(initial_run()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "initial-run",
                "payload": {
                    "agentId": 42,
                    "cid": "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG",
                    "owner": "0xabc"
                }
            })
        );
    }

    #[test]
    fn test_unknown_job_name_is_rejected() {
        let result: Result<JobPayload, _> =
            serde_json::from_value(json!({"name": "unknown", "payload": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_job_serializes_flat() {
        let job = Job::new(initial_run(), 3);
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["name"], "initial-run");
        assert_eq!(value["payload"]["agentId"], 42);
        assert_eq!(value["state"], "waiting");
        assert_eq!(value["attempts"], 0);
    }

    #[test]
    fn test_state_after_failure() {
        let mut job = Job::new(initial_run(), 2);
        job.attempts = 1;
        assert_eq!(job.state_after_failure(), JobState::Waiting);
        job.attempts = 2;
        assert_eq!(job.state_after_failure(), JobState::Failed);
    }

    #[test]
    fn test_state_parse_round_trip() {
        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("paused"), None);
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Active.is_terminal());
    }
}
