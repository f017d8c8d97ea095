//! Content store client
//!
//! Pins agent documents to content-addressable storage and reads them back
//! by CID. Results are cached in a [`ContentCache`] owned by the client, and
//! every remote call goes through [`retry_with_backoff`].
//!
//! Exactly one document is pinned per call. Directory or multi-file uploads
//! are not supported.

pub mod cache;
pub mod cid;
pub mod http;
pub mod memory;

pub use cache::{CacheStats, Clock, ContentCache, ContentRecord, ManualClock, SystemClock};
pub use cid::{compute_cid_v1, is_valid_cid};
pub use http::{HttpContentStore, HttpContentStoreConfig};
pub use memory::MemoryContentStore;

use crate::observability::metrics;
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Largest serialized document accepted by [`ContentClient::pin`]
pub const MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

/// Filename used when pinning agent configurations
pub const AGENT_CONFIG_FILENAME: &str = "agent-config.json";

/// Content store errors
#[derive(Debug, Error)]
pub enum ContentError {
    /// Bad input; never retried
    #[error("Invalid content: {0}")]
    Validation(String),

    /// Store unreachable, timed out or answered with an error
    #[error("Content store unavailable: {0}")]
    Transport(String),

    /// Document missing or not parseable
    #[error("Content retrieval failed: {0}")]
    Retrieval(String),

    #[error("Content store failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ContentError>,
    },
}

impl ContentError {
    /// True for failures worth retrying at the calling layer
    pub fn is_transient(&self) -> bool {
        match self {
            ContentError::Validation(_) => false,
            ContentError::Transport(_) | ContentError::Retrieval(_) => true,
            ContentError::Exhausted { last, .. } => last.is_transient(),
        }
    }

    /// True when the failure is (or ends in) a retrieval error
    pub fn is_retrieval(&self) -> bool {
        match self {
            ContentError::Retrieval(_) => true,
            ContentError::Exhausted { last, .. } => last.is_retrieval(),
            _ => false,
        }
    }
}

impl From<RetryError<ContentError>> for ContentError {
    fn from(err: RetryError<ContentError>) -> Self {
        ContentError::Exhausted {
            attempts: err.attempts,
            last: Box::new(err.last),
        }
    }
}

/// Storage behind the client
#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Store a single document and return its CID
    async fn upload(&self, filename: &str, payload: Bytes) -> Result<String, ContentError>;

    /// Read a document's raw bytes by CID
    async fn retrieve(&self, cid: &str) -> Result<Bytes, ContentError>;
}

/// Check a document and return its deterministic serialization.
///
/// `serde_json` without `preserve_order` keeps object keys sorted, so equal
/// documents always serialize to the same bytes.
pub fn validate_document(document: &Value, filename: &str) -> Result<Vec<u8>, ContentError> {
    let object = document
        .as_object()
        .ok_or_else(|| ContentError::Validation("document must be a JSON object".to_string()))?;

    if filename.trim().is_empty() {
        return Err(ContentError::Validation(
            "filename must not be empty".to_string(),
        ));
    }

    match object.get("name") {
        None => {}
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        Some(Value::String(_)) | Some(Value::Null) => {
            return Err(ContentError::Validation(
                "name must not be blank".to_string(),
            ))
        }
        Some(_) => {
            return Err(ContentError::Validation(
                "name must be a string".to_string(),
            ))
        }
    }

    match object.get("modules") {
        None => {}
        Some(Value::Array(modules)) if !modules.is_empty() => {}
        Some(Value::Array(_)) => {
            return Err(ContentError::Validation(
                "modules must not be empty".to_string(),
            ))
        }
        Some(_) => {
            return Err(ContentError::Validation(
                "modules must be a list".to_string(),
            ))
        }
    }

    let serialized = serde_json::to_vec(document)
        .map_err(|e| ContentError::Validation(format!("document is not serializable: {e}")))?;

    if serialized.len() > MAX_DOCUMENT_BYTES {
        return Err(ContentError::Validation(format!(
            "document is {} bytes, limit is {MAX_DOCUMENT_BYTES}",
            serialized.len()
        )));
    }

    Ok(serialized)
}

/// Client for the content store with caching and retry
#[derive(Clone)]
pub struct ContentClient {
    backend: Arc<dyn ContentBackend>,
    cache: Arc<ContentCache>,
    retry: RetryPolicy,
}

impl ContentClient {
    pub fn new(backend: Arc<dyn ContentBackend>, cache: Arc<ContentCache>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            cache,
            retry,
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Pin one document and return its CID
    pub async fn pin(&self, document: &Value, filename: &str) -> Result<String, ContentError> {
        let serialized = validate_document(document, filename)?;
        let key = cache::pin_key(filename, &serialized);

        if let Some(hit) = self.cache.get(&key) {
            debug!(cid = %hit.cid, "Pin served from cache");
            metrics().content_pinned(true);
            return Ok(hit.cid);
        }

        let payload = Bytes::from(serialized);
        let cid = retry_with_backoff(self.retry, "content.pin", || {
            self.backend.upload(filename, payload.clone())
        })
        .await?;

        if !is_valid_cid(&cid) {
            return Err(ContentError::Transport(format!(
                "{} store returned an unrecognised CID: {cid}",
                self.backend.name()
            )));
        }

        let record = ContentRecord {
            cid: cid.clone(),
            payload,
            created_at: self.cache.now(),
        };
        self.cache.insert(cache::cid_key(&cid), record.clone());
        self.cache.insert(key, record);

        metrics().content_pinned(false);
        info!(cid = %cid, filename, backend = self.backend.name(), "Pinned document");
        Ok(cid)
    }

    /// Fetch and parse a document by CID
    pub async fn fetch(&self, cid: &str) -> Result<Value, ContentError> {
        if !is_valid_cid(cid) {
            return Err(ContentError::Validation(format!("invalid CID: {cid:?}")));
        }

        let key = cache::cid_key(cid);
        if let Some(hit) = self.cache.get(&key) {
            if let Ok(document) = serde_json::from_slice(&hit.payload) {
                debug!(cid, "Fetch served from cache");
                metrics().content_fetched(true);
                return Ok(document);
            }
        }

        let (payload, document) = retry_with_backoff(self.retry, "content.fetch", || async {
            let payload = self.backend.retrieve(cid).await?;
            let document: Value = serde_json::from_slice(&payload).map_err(|e| {
                ContentError::Retrieval(format!("{cid} is not valid JSON: {e}"))
            })?;
            Ok::<_, ContentError>((payload, document))
        })
        .await?;

        self.cache.insert(
            key,
            ContentRecord {
                cid: cid.to_string(),
                payload,
                created_at: self.cache.now(),
            },
        );

        metrics().content_fetched(false);
        debug!(cid, "Fetched document");
        Ok(document)
    }

    /// Pure syntactic CID check
    pub fn is_valid_cid(&self, cid: &str) -> bool {
        is_valid_cid(cid)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn client() -> (ContentClient, Arc<MemoryContentStore>) {
        let store = Arc::new(MemoryContentStore::new());
        let client = ContentClient::new(
            store.clone(),
            Arc::new(ContentCache::default()),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        (client, store)
    }

    #[test]
    fn test_validation_rejects_non_object() {
        let err = validate_document(&json!(["a"]), "a.json").unwrap_err();
        assert!(err.to_string().contains("JSON object"));
        assert!(validate_document(&json!("text"), "a.json").is_err());
    }

    #[test]
    fn test_validation_rejects_empty_filename() {
        assert!(validate_document(&json!({}), "").is_err());
        assert!(validate_document(&json!({}), "   ").is_err());
    }

    #[test]
    fn test_validation_rejects_blank_name_and_empty_modules() {
        assert!(validate_document(&json!({"name": "  "}), "a.json").is_err());
        assert!(validate_document(&json!({"name": null}), "a.json").is_err());
        assert!(validate_document(&json!({"modules": []}), "a.json").is_err());
        assert!(validate_document(&json!({"modules": "PriceFeed"}), "a.json").is_err());
        assert!(validate_document(&json!({"name": "ok", "modules": ["m"]}), "a.json").is_ok());
    }

    #[test]
    fn test_validation_size_limit() {
        let big = "x".repeat(MAX_DOCUMENT_BYTES);
        let err = validate_document(&json!({ "blob": big }), "a.json").unwrap_err();
        assert!(matches!(err, ContentError::Validation(_)));
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn test_serialization_is_key_order_independent() {
        let a = validate_document(&json!({"b": 1, "a": 2}), "x.json").unwrap();
        let b = validate_document(&json!({"a": 2, "b": 1}), "x.json").unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_validation_error_makes_no_upload() {
        let (client, store) = client();
        let err = client.pin(&json!({"modules": []}), "a.json").await.unwrap_err();

        assert!(!err.is_transient());
        assert_eq!(store.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_pin_then_fetch_round_trip() {
        let (client, _store) = client();
        let document = json!({"name": "Bot A", "modules": ["PriceFeed"], "trigger": "manual"});

        let cid = client.pin(&document, AGENT_CONFIG_FILENAME).await.unwrap();
        assert!(client.is_valid_cid(&cid));

        client.clear_cache();
        let fetched = client.fetch(&cid).await.unwrap();
        assert_eq!(fetched, document);
    }

    #[tokio::test]
    async fn test_second_pin_is_served_from_cache() {
        let (client, store) = client();
        let document = json!({"name": "Bot A", "modules": ["PriceFeed"]});

        let first = client.pin(&document, AGENT_CONFIG_FILENAME).await.unwrap();
        let second = client.pin(&document, AGENT_CONFIG_FILENAME).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_pin_after_ttl_uploads_again() {
        let store = Arc::new(MemoryContentStore::new());
        let clock = Arc::new(ManualClock::default());
        let client = ContentClient::new(
            store.clone(),
            Arc::new(ContentCache::with_clock(cache::DEFAULT_CACHE_TTL, clock.clone())),
            RetryPolicy::no_retry(),
        );
        let document = json!({"name": "Bot A"});

        client.pin(&document, "a.json").await.unwrap();
        clock.advance(Duration::from_secs(301));
        client.pin(&document, "a.json").await.unwrap();

        assert_eq!(store.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_cid_without_network() {
        let (client, store) = client();
        let err = client.fetch("not-a-cid").await.unwrap_err();

        assert!(matches!(err, ContentError::Validation(_)));
        assert_eq!(store.retrieval_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_non_json_is_retrieval_error() {
        let (client, store) = client();
        let cid = store.seed(Bytes::from_static(b"<html>")).await;

        let err = client.fetch(&cid).await.unwrap_err();
        assert!(err.is_retrieval());
        assert_eq!(store.retrieval_count(), 3);
    }

    #[tokio::test]
    async fn test_fetch_populates_cache() {
        let (client, store) = client();
        let cid = store.seed(Bytes::from_static(b"{\"name\":\"x\"}")).await;

        client.fetch(&cid).await.unwrap();
        client.fetch(&cid).await.unwrap();

        assert_eq!(store.retrieval_count(), 1);
        assert!(client.cache_stats().keys.contains(&format!("cid:{cid}")));
    }
}
