//! Worker pool
//!
//! Runs N independent workers that poll the queue, plus a reaper that puts
//! jobs with expired leases back to `waiting`. Shutdown is signalled through a
//! watch channel; a worker finishes the job it holds before exiting.

use super::{Job, JobQueue, JobState, QueueError};
use crate::error::{sanitize_error_message, DeployError};
use crate::job_span;
use crate::observability::metrics;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Executes one kind of job
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job and return its result; an error fails this attempt
    async fn handle(&self, job: &Job) -> Result<Value, DeployError>;
}

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers
    pub concurrency: usize,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// Time a job may stay active before it is redelivered
    pub lease: Duration,
    /// How often the reaper looks for expired leases
    pub reap_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_secs(1),
            lease: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Final state of one processed delivery
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    pub state: JobState,
    pub attempts: u32,
}

/// Pool of queue workers
#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerPoolConfig,
}

/// Handle to a running pool
pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Signal shutdown and wait for every worker to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Worker task panicked: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Process at most one waiting job
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, QueueError> {
        let Some(job) = self.queue.dequeue().await? else {
            return Ok(None);
        };
        self.process(job).await.map(Some)
    }

    /// Process waiting jobs until the queue is empty
    pub async fn drain(&self) -> Result<Vec<JobOutcome>, QueueError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_once().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn process(&self, job: Job) -> Result<JobOutcome, QueueError> {
        let span = job_span!(job_id = %job.id, job = job.name(), attempt = job.attempts);
        self.execute(job).instrument(span).await
    }

    async fn execute(&self, job: Job) -> Result<JobOutcome, QueueError> {
        metrics().job_started();
        let started = Instant::now();
        debug!("Job started");

        let state = match self.handler.handle(&job).await {
            Ok(result) => {
                if let Err(e) = self.queue.complete(&job.id, result).await {
                    metrics().job_unrecorded();
                    return Err(e);
                }
                metrics().job_completed(started.elapsed());
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Job completed");
                JobState::Completed
            }
            Err(e) => {
                let message = sanitize_error_message(&e.to_string());
                let state = match self.queue.fail(&job.id, &message).await {
                    Ok(state) => state,
                    Err(queue_error) => {
                        metrics().job_unrecorded();
                        return Err(queue_error);
                    }
                };
                metrics().job_failed(started.elapsed(), state == JobState::Failed);

                if state == JobState::Failed {
                    error!(error = %message, kind = e.kind().as_str(), "Job failed permanently");
                } else {
                    warn!(error = %message, kind = e.kind().as_str(), "Job attempt failed, will retry");
                }
                state
            }
        };

        Ok(JobOutcome {
            job_id: job.id,
            state,
            attempts: job.attempts,
        })
    }

    async fn worker_loop(self, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        info!(worker_id, "Worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(worker_id, "Queue error: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }

        info!(worker_id, "Worker shutting down");
    }

    async fn reaper_loop(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.reap_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.queue.requeue_stale(self.config.lease).await {
                        Ok(0) => {}
                        Ok(count) => {
                            metrics().jobs_requeued(count);
                            warn!(count, "Released jobs with expired leases");
                        }
                        Err(e) => error!("Lease reaper failed: {}", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Spawn the workers and the lease reaper
    pub fn start(self) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let concurrency = self.config.concurrency.max(1);

        info!(concurrency, "Starting worker pool");

        let mut tasks: Vec<JoinHandle<()>> = (0..concurrency)
            .map(|worker_id| tokio::spawn(self.clone().worker_loop(worker_id, shutdown_rx.clone())))
            .collect();
        tasks.push(tokio::spawn(self.reaper_loop(shutdown_rx)));

        WorkerPoolHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}
