//! Process-local job queue
//!
//! Same state machine as [`super::SqliteJobQueue`] without durability. Used
//! by tests and by `serve --in-process-worker` in development. Finished jobs
//! are kept for inspection, so the queue grows with every job it has seen;
//! long-running deployments should use the SQLite queue.

use super::{
    lease_cutoff, Job, JobPayload, JobQueue, JobState, QueueCounts, QueueError, QueueSettings,
    LEASE_EXPIRED,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct QueueState {
    /// Every job, in enqueue order
    jobs: Vec<Job>,
    index: HashMap<String, usize>,
    /// Positions of waiting jobs; the smallest is delivered next
    waiting: BTreeSet<usize>,
}

impl QueueState {
    fn active_job(&mut self, job_id: &str) -> Result<(usize, &mut Job), QueueError> {
        let position = *self
            .index
            .get(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        let job = &mut self.jobs[position];
        if job.state != JobState::Active {
            return Err(QueueError::NotActive {
                job_id: job_id.to_string(),
                state: job.state,
            });
        }
        Ok((position, job))
    }
}

/// In-memory job queue
#[derive(Debug)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    settings: QueueSettings,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::with_settings(QueueSettings::default())
    }

    pub fn with_settings(settings: QueueSettings) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            settings,
        }
    }

    /// All jobs in enqueue order
    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, payload: JobPayload) -> Result<String, QueueError> {
        let job = Job::new(payload, self.settings.max_attempts);
        let id = job.id.clone();

        let mut state = self.state.lock().await;
        let position = state.jobs.len();
        state.jobs.push(job);
        state.index.insert(id.clone(), position);
        state.waiting.insert(position);

        debug!(job_id = %id, "Job enqueued");
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(position) = state.waiting.pop_first() else {
            return Ok(None);
        };

        let job = &mut state.jobs[position];
        job.state = JobState::Active;
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: &str, result: Value) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let (_, job) = state.active_job(job_id)?;
        job.state = JobState::Completed;
        job.result = Some(result);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<JobState, QueueError> {
        let mut state = self.state.lock().await;
        let (position, job) = state.active_job(job_id)?;
        job.state = job.state_after_failure();
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();

        let next = job.state;
        if next == JobState::Waiting {
            state.waiting.insert(position);
        }
        Ok(next)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        let state = self.state.lock().await;
        Ok(state
            .index
            .get(job_id)
            .map(|position| state.jobs[*position].clone()))
    }

    async fn requeue_stale(&self, lease: Duration) -> Result<usize, QueueError> {
        let cutoff = lease_cutoff(lease);
        let mut state = self.state.lock().await;
        let QueueState { jobs, waiting, .. } = &mut *state;

        let mut released = 0;
        for (position, job) in jobs.iter_mut().enumerate() {
            if job.state != JobState::Active || job.updated_at > cutoff {
                continue;
            }

            job.updated_at = Utc::now();
            if job.attempts >= job.max_attempts {
                job.state = JobState::Failed;
                job.last_error = Some(LEASE_EXPIRED.to_string());
                warn!(job_id = %job.id, attempts = job.attempts, "Lease expired on final attempt");
            } else {
                job.state = JobState::Waiting;
                waiting.insert(position);
            }
            released += 1;
        }
        Ok(released)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for job in &state.jobs {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
