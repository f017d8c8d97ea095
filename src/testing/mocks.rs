//! Mock implementations for testing
//!
//! Content, registry, store and queue doubles with call counters and
//! injectable failures, so pipeline behaviour can be tested without an IPFS
//! service, a chain node or a database file.

use crate::content::{ContentBackend, ContentError, MemoryContentStore};
use crate::queue::{Job, JobPayload, JobQueue, JobState, MemoryJobQueue, QueueCounts, QueueError};
use crate::registry::{
    ChainError, LogEntry, RegistryBackend, TransactionReceipt, AGENT_REGISTERED_TOPIC,
};
use crate::store::{AgentRecord, AgentStore, NewAgentRecord, PersistenceError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Address used as the emitting contract in mock receipts
pub const MOCK_REGISTRY_ADDRESS: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

/// Content backend that fails a configurable number of times before
/// delegating to an in-memory store
#[derive(Debug)]
pub struct FlakyContentBackend {
    inner: MemoryContentStore,
    failures_remaining: AtomicUsize,
    upload_calls: AtomicUsize,
    retrieve_calls: AtomicUsize,
    upload_times: Mutex<Vec<Instant>>,
}

impl Default for FlakyContentBackend {
    fn default() -> Self {
        Self::failing(0)
    }
}

impl FlakyContentBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `failures` calls
    pub fn failing(failures: usize) -> Self {
        Self {
            inner: MemoryContentStore::new(),
            failures_remaining: AtomicUsize::new(failures),
            upload_calls: AtomicUsize::new(0),
            retrieve_calls: AtomicUsize::new(0),
            upload_times: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(usize::MAX)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    /// Total calls of either kind
    pub fn calls(&self) -> usize {
        self.upload_calls() + self.retrieve_calls()
    }

    /// Gaps between consecutive upload attempts
    pub async fn upload_gaps(&self) -> Vec<Duration> {
        let times = self.upload_times.lock().await;
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn store(&self) -> &MemoryContentStore {
        &self.inner
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                match n {
                    0 => None,
                    usize::MAX => Some(usize::MAX),
                    n => Some(n - 1),
                }
            })
            .is_ok()
    }
}

#[async_trait]
impl ContentBackend for FlakyContentBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn upload(&self, filename: &str, payload: Bytes) -> Result<String, ContentError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.upload_times.lock().await.push(Instant::now());

        if self.take_failure() {
            return Err(ContentError::Transport("simulated upload outage".to_string()));
        }
        self.inner.upload(filename, payload).await
    }

    async fn retrieve(&self, cid: &str) -> Result<Bytes, ContentError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_failure() {
            return Err(ContentError::Transport("simulated gateway outage".to_string()));
        }
        self.inner.retrieve(cid).await
    }
}

/// How [`MockRegistry`] answers a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    /// Mined with an `AgentRegistered` event carrying the next id
    Indexed,
    /// Mined without the registration event
    Unindexed,
    /// Mined but reverted
    Reverted,
    /// Rejected by the node before submission
    Rejected,
    /// Accepted by the node but never mined
    NeverMined,
}

/// In-process registry contract
#[derive(Debug)]
pub struct MockRegistry {
    mode: std::sync::Mutex<RegistryMode>,
    next_agent_id: AtomicU64,
    tx_counter: AtomicU64,
    submit_attempts: AtomicUsize,
    submissions: Mutex<Vec<String>>,
    receipts: Mutex<HashMap<String, TransactionReceipt>>,
    receipt_calls: AtomicUsize,
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::with_mode(RegistryMode::Indexed)
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: RegistryMode) -> Self {
        Self {
            mode: std::sync::Mutex::new(mode),
            next_agent_id: AtomicU64::new(1),
            tx_counter: AtomicU64::new(0),
            submit_attempts: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            receipt_calls: AtomicUsize::new(0),
        }
    }

    /// Start assigning ids at `id`
    pub fn starting_at(self, id: u64) -> Self {
        self.next_agent_id.store(id, Ordering::SeqCst);
        self
    }

    pub fn set_mode(&self, mode: RegistryMode) {
        if let Ok(mut current) = self.mode.lock() {
            *current = mode;
        }
    }

    fn mode(&self) -> RegistryMode {
        self.mode
            .lock()
            .map(|mode| *mode)
            .unwrap_or(RegistryMode::Indexed)
    }

    /// Transactions accepted by the node
    pub fn submission_count(&self) -> usize {
        self.tx_counter.load(Ordering::SeqCst) as usize
    }

    /// Calls to `submit_registration`, rejected ones included
    pub fn submit_attempts(&self) -> usize {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    pub fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }

    /// CIDs submitted so far, in order
    pub async fn submitted_cids(&self) -> Vec<String> {
        self.submissions.lock().await.clone()
    }

    /// Add a registration event to an already mined transaction, as a late
    /// indexer would see it
    pub async fn index_transaction(&self, tx_hash: &str, agent_id: u64) {
        if let Some(receipt) = self.receipts.lock().await.get_mut(tx_hash) {
            receipt.logs.push(registration_log(agent_id));
        }
    }
}

/// An `AgentRegistered(agentId, owner)` log entry
pub fn registration_log(agent_id: u64) -> LogEntry {
    LogEntry {
        address: MOCK_REGISTRY_ADDRESS.to_string(),
        topics: vec![
            AGENT_REGISTERED_TOPIC.to_string(),
            format!("0x{agent_id:064x}"),
        ],
        data: "0x".to_string(),
    }
}

#[async_trait]
impl RegistryBackend for MockRegistry {
    fn name(&self) -> &str {
        "mock"
    }

    fn contract_address(&self) -> &str {
        MOCK_REGISTRY_ADDRESS
    }

    async fn submit_registration(&self, cid: &str) -> Result<String, ChainError> {
        self.submit_attempts.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode();
        if mode == RegistryMode::Rejected {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "insufficient funds for gas".to_string(),
            });
        }

        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let tx_hash = format!("0x{n:064x}");
        self.submissions.lock().await.push(cid.to_string());
        if mode == RegistryMode::NeverMined {
            return Ok(tx_hash);
        }

        let logs = match mode {
            RegistryMode::Indexed => {
                vec![registration_log(self.next_agent_id.fetch_add(1, Ordering::SeqCst))]
            }
            _ => Vec::new(),
        };

        let receipt = TransactionReceipt {
            transaction_hash: tx_hash.clone(),
            block_number: Some(n),
            success: mode != RegistryMode::Reverted,
            logs,
        };
        self.receipts.lock().await.insert(tx_hash.clone(), receipt);

        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>, ChainError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.lock().await.get(tx_hash).cloned())
    }
}

/// In-memory agent store that can be switched to fail every call
#[derive(Debug, Default)]
pub struct MockAgentStore {
    records: Mutex<Vec<AgentRecord>>,
    fail: bool,
    inserts: AtomicUsize,
}

impl MockAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails as if the database were locked
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub async fn records(&self) -> Vec<AgentRecord> {
        self.records.lock().await.clone()
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.fail {
            Err(PersistenceError::Unavailable("database is locked".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AgentStore for MockAgentStore {
    async fn insert(&self, record: NewAgentRecord) -> Result<AgentRecord, PersistenceError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let mut records = self.records.lock().await;
        let stored = AgentRecord {
            id: records.len() as i64 + 1,
            owner: record.owner,
            cid: record.cid,
            name: record.name,
            tx_hash: record.tx_hash,
            chain_agent_id: record.chain_agent_id,
            created_at: Utc::now(),
        };
        records.push(stored.clone());
        Ok(stored)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<AgentRecord>, PersistenceError> {
        self.check()?;
        Ok(self.records.lock().await.iter().find(|r| r.id == id).cloned())
    }
}

/// Memory queue with an enqueue counter and an unavailable mode
#[derive(Debug, Default)]
pub struct MockJobQueue {
    inner: MemoryJobQueue,
    fail_enqueue: bool,
    enqueues: AtomicUsize,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that refuses new jobs
    pub fn failing() -> Self {
        Self {
            fail_enqueue: true,
            ..Self::default()
        }
    }

    pub fn enqueue_calls(&self) -> usize {
        self.enqueues.load(Ordering::SeqCst)
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.inner.jobs().await
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn enqueue(&self, payload: JobPayload) -> Result<String, QueueError> {
        self.enqueues.fetch_add(1, Ordering::SeqCst);
        if self.fail_enqueue {
            return Err(QueueError::Unavailable("connection refused".to_string()));
        }
        self.inner.enqueue(payload).await
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        self.inner.dequeue().await
    }

    async fn complete(&self, job_id: &str, result: Value) -> Result<(), QueueError> {
        self.inner.complete(job_id, result).await
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<JobState, QueueError> {
        self.inner.fail(job_id, error).await
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        self.inner.get(job_id).await
    }

    async fn requeue_stale(&self, lease: Duration) -> Result<usize, QueueError> {
        self.inner.requeue_stale(lease).await
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        self.inner.counts().await
    }
}
