//! In-process content store
//!
//! Content-addresses documents locally with CIDv1 (raw, sha2-256), so the
//! identifiers it hands out have the same shape a real IPFS node would use.
//! Used for local development and as the backing store of test doubles.

use super::cid::compute_cid_v1;
use super::{ContentBackend, ContentError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryContentStore {
    objects: RwLock<HashMap<String, Bytes>>,
    uploads: AtomicUsize,
    retrievals: AtomicUsize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upload calls that reached this store
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of retrieve calls that reached this store
    pub fn retrieval_count(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    pub async fn contains(&self, cid: &str) -> bool {
        self.objects.read().await.contains_key(cid)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Store raw bytes under their CID without counting an upload
    pub async fn seed(&self, payload: Bytes) -> String {
        let cid = compute_cid_v1(&payload);
        self.objects.write().await.insert(cid.clone(), payload);
        cid
    }
}

#[async_trait]
impl ContentBackend for MemoryContentStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(&self, _filename: &str, payload: Bytes) -> Result<String, ContentError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let cid = compute_cid_v1(&payload);
        self.objects.write().await.insert(cid.clone(), payload);
        Ok(cid)
    }

    async fn retrieve(&self, cid: &str) -> Result<Bytes, ContentError> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        self.objects
            .read()
            .await
            .get(cid)
            .cloned()
            .ok_or_else(|| ContentError::Retrieval(format!("{cid} is not pinned")))
    }
}
