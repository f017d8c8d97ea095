//! Durable SQLite job queue
//!
//! Jobs are claimed with a single `UPDATE ... RETURNING`, so several worker
//! processes can share one database file without double-claiming a job.

use super::{
    lease_cutoff, Job, JobPayload, JobQueue, JobState, QueueCounts, QueueError, QueueSettings,
    LEASE_EXPIRED,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS jobs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        payload TEXT NOT NULL,
        state TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        last_error TEXT,
        result TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs (state, seq);
";

const JOB_COLUMNS: &str =
    "id, payload, state, attempts, max_attempts, last_error, result, created_at, updated_at";

/// Fixed-width UTC timestamps so lexical order matches time order
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(column: usize, ty: Type) -> impl FnOnce(E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| rusqlite::Error::FromSqlConversionFailure(column, ty, Box::new(e))
}

fn map_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let payload: String = row.get(1)?;
    let payload: JobPayload =
        serde_json::from_str(&payload).map_err(conversion_error(1, Type::Text))?;

    let state: String = row.get(2)?;
    let state = JobState::parse(&state).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown job state {state:?}").into(),
        )
    })?;

    let result: Option<String> = row.get(6)?;
    let result = result
        .map(|raw| serde_json::from_str::<Value>(&raw))
        .transpose()
        .map_err(conversion_error(6, Type::Text))?;

    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Job {
        id: row.get(0)?,
        payload,
        state,
        attempts: row.get(3)?,
        max_attempts: row.get(4)?,
        last_error: row.get(5)?,
        result,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(conversion_error(7, Type::Text))?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(conversion_error(8, Type::Text))?
            .with_timezone(&Utc),
    })
}

/// SQLite-backed job queue
#[derive(Clone)]
pub struct SqliteJobQueue {
    db: Arc<Mutex<Connection>>,
    settings: QueueSettings,
}

impl SqliteJobQueue {
    pub fn open<P: AsRef<Path>>(path: P, settings: QueueSettings) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened job queue");
        Self::bootstrap(conn, settings)
    }

    pub fn in_memory(settings: QueueSettings) -> Result<Self, QueueError> {
        Self::bootstrap(Connection::open_in_memory()?, settings)
    }

    fn bootstrap(conn: Connection, settings: QueueSettings) -> Result<Self, QueueError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            settings,
        })
    }

    fn load(conn: &Connection, job_id: &str) -> Result<Option<Job>, QueueError> {
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id],
                map_job,
            )
            .optional()?;
        Ok(job)
    }

    fn load_active(conn: &Connection, job_id: &str) -> Result<Job, QueueError> {
        let job = Self::load(conn, job_id)?.ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        if job.state != JobState::Active {
            return Err(QueueError::NotActive {
                job_id: job_id.to_string(),
                state: job.state,
            });
        }
        Ok(job)
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, payload: JobPayload) -> Result<String, QueueError> {
        let job = Job::new(payload, self.settings.max_attempts);
        let encoded = serde_json::to_string(&job.payload)?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO jobs (id, name, payload, state, attempts, max_attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)",
            params![
                job.id,
                job.name(),
                encoded,
                JobState::Waiting.as_str(),
                job.max_attempts,
                timestamp(job.created_at)
            ],
        )?;

        debug!(job_id = %job.id, name = job.name(), "Job enqueued");
        Ok(job.id)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let db = self.db.lock().await;
        let job = db
            .query_row(
                &format!(
                    "UPDATE jobs SET state = 'active', attempts = attempts + 1, updated_at = ?1
                     WHERE seq = (SELECT seq FROM jobs WHERE state = 'waiting' ORDER BY seq LIMIT 1)
                     RETURNING {JOB_COLUMNS}"
                ),
                params![timestamp(Utc::now())],
                map_job,
            )
            .optional()?;
        Ok(job)
    }

    async fn complete(&self, job_id: &str, result: Value) -> Result<(), QueueError> {
        let encoded = serde_json::to_string(&result)?;
        let db = self.db.lock().await;
        Self::load_active(&db, job_id)?;

        db.execute(
            "UPDATE jobs SET state = 'completed', result = ?2, updated_at = ?3 WHERE id = ?1",
            params![job_id, encoded, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<JobState, QueueError> {
        let db = self.db.lock().await;
        let job = Self::load_active(&db, job_id)?;
        let next = job.state_after_failure();

        db.execute(
            "UPDATE jobs SET state = ?2, last_error = ?3, updated_at = ?4 WHERE id = ?1",
            params![job_id, next.as_str(), error, timestamp(Utc::now())],
        )?;
        Ok(next)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        let db = self.db.lock().await;
        Self::load(&db, job_id)
    }

    async fn requeue_stale(&self, lease: Duration) -> Result<usize, QueueError> {
        let cutoff = timestamp(lease_cutoff(lease));
        let now = timestamp(Utc::now());
        let db = self.db.lock().await;

        let expired = db.execute(
            "UPDATE jobs SET state = 'failed', last_error = ?3, updated_at = ?2
             WHERE state = 'active' AND updated_at <= ?1 AND attempts >= max_attempts",
            params![cutoff, now, LEASE_EXPIRED],
        )?;
        let requeued = db.execute(
            "UPDATE jobs SET state = 'waiting', updated_at = ?2
             WHERE state = 'active' AND updated_at <= ?1",
            params![cutoff, now],
        )?;

        if expired > 0 {
            warn!(expired, "Failed jobs whose lease expired on the final attempt");
        }
        if requeued > 0 {
            info!(requeued, "Requeued jobs with expired leases");
        }
        Ok(expired + requeued)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (state, count) = row?;
            let count = usize::try_from(count).unwrap_or_default();
            match JobState::parse(&state) {
                Some(JobState::Waiting) => counts.waiting = count,
                Some(JobState::Active) => counts.active = count,
                Some(JobState::Completed) => counts.completed = count,
                Some(JobState::Failed) => counts.failed = count,
                None => {}
            }
        }
        Ok(counts)
    }
}
