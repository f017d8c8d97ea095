use super::{AgentRecord, AgentStore, NewAgentRecord, PersistenceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_address TEXT,
        ipfs_cid TEXT NOT NULL CHECK (length(ipfs_cid) > 0),
        agent_name TEXT,
        tx_hash TEXT NOT NULL CHECK (length(tx_hash) > 0),
        chain_agent_id INTEGER,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_agents_cid ON agents (ipfs_cid);
";

/// SQLite-backed agent store
#[derive(Clone)]
pub struct SqliteAgentStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteAgentStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened agent store");
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, PersistenceError> {
        // the job queue may hold the same file
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
        let created_at: String = row.get(6)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
            })?;

        let chain_agent_id: Option<i64> = row.get(5)?;
        let chain_agent_id = chain_agent_id
            .map(u64::try_from)
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Integer, Box::new(e))
            })?;

        Ok(AgentRecord {
            id: row.get(0)?,
            owner: row.get(1)?,
            cid: row.get(2)?,
            name: row.get(3)?,
            tx_hash: row.get(4)?,
            chain_agent_id,
            created_at,
        })
    }
}

fn classify(err: rusqlite::Error) -> PersistenceError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            PersistenceError::Constraint(message.clone().unwrap_or_else(|| err.to_string()))
        }
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::CannotOpen | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            PersistenceError::Unavailable(err.to_string())
        }
        _ => PersistenceError::Database(err),
    }
}

#[async_trait]
impl AgentStore for SqliteAgentStore {
    async fn insert(&self, record: NewAgentRecord) -> Result<AgentRecord, PersistenceError> {
        let chain_agent_id = record
            .chain_agent_id
            .map(i64::try_from)
            .transpose()
            .map_err(|_| PersistenceError::Constraint("chain agent id exceeds i64".to_string()))?;
        let created_at = Utc::now();

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agents (owner_address, ipfs_cid, agent_name, tx_hash, chain_agent_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.owner,
                record.cid,
                record.name,
                record.tx_hash,
                chain_agent_id,
                created_at.to_rfc3339()
            ],
        )
        .map_err(classify)?;
        let id = db.last_insert_rowid();

        debug!(id, cid = %record.cid, "Inserted agent record");

        Ok(AgentRecord {
            id,
            owner: record.owner,
            cid: record.cid,
            name: record.name,
            tx_hash: record.tx_hash,
            chain_agent_id: record.chain_agent_id,
            created_at,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<AgentRecord>, PersistenceError> {
        let db = self.db.lock().await;
        db.query_row(
            "SELECT id, owner_address, ipfs_cid, agent_name, tx_hash, chain_agent_id, created_at
             FROM agents WHERE id = ?1",
            params![id],
            Self::map_row,
        )
        .optional()
        .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(cid: &str) -> NewAgentRecord {
        NewAgentRecord {
            owner: Some("0xabc".to_string()),
            cid: cid.to_string(),
            name: Some("Bot A".to_string()),
            tx_hash: "0x01".to_string(),
            chain_agent_id: Some(1),
        }
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let store = SqliteAgentStore::in_memory().unwrap();
        let inserted = store.insert(new_record("bafy-a")).await.unwrap();

        let fetched = store.get_by_id(inserted.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, inserted.id);
        assert_eq!(fetched.cid, "bafy-a");
        assert_eq!(fetched.owner.as_deref(), Some("0xabc"));
        assert_eq!(fetched.chain_agent_id, Some(1));
        assert_eq!(fetched.created_at.timestamp(), inserted.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_missing_id_is_none() {
        let store = SqliteAgentStore::in_memory().unwrap();
        assert!(store.get_by_id(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicates_create_two_rows() {
        let store = SqliteAgentStore::in_memory().unwrap();
        let a = store.insert(new_record("bafy-a")).await.unwrap();
        let b = store.insert(new_record("bafy-a")).await.unwrap();

        assert_ne!(a.id, b.id);
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_optional_fields_round_trip_as_null() {
        let store = SqliteAgentStore::in_memory().unwrap();
        let record = NewAgentRecord {
            owner: None,
            cid: "bafy-b".to_string(),
            name: None,
            tx_hash: "0x02".to_string(),
            chain_agent_id: None,
        };
        let inserted = store.insert(record).await.unwrap();
        let fetched = store.get_by_id(inserted.id).await.unwrap().unwrap();

        assert_eq!(fetched.owner, None);
        assert_eq!(fetched.name, None);
        assert_eq!(fetched.chain_agent_id, None);
    }

    #[tokio::test]
    async fn test_empty_cid_violates_constraint() {
        let store = SqliteAgentStore::in_memory().unwrap();
        let err = store.insert(new_record("")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.db");

        let id = {
            let store = SqliteAgentStore::open(&path).unwrap();
            store.insert(new_record("bafy-durable")).await.unwrap().id
        };

        let reopened = SqliteAgentStore::open(&path).unwrap();
        let record = reopened.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.cid, "bafy-durable");
    }
}
