//! HTTP content store backend
//!
//! Uploads go to a web3.storage-style pinning API (`POST {api_url}/upload`
//! with a bearer token, answering `{"cid": "..."}`); reads go through an IPFS
//! HTTP gateway (`GET {gateway_url}/ipfs/{cid}`). Every request carries the
//! configured timeout so a hung store surfaces as an ordinary failure.

use super::{ContentBackend, ContentError};
use crate::config::ContentStoreSection;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Endpoint settings for [`HttpContentStore`]
#[derive(Debug, Clone)]
pub struct HttpContentStoreConfig {
    /// Base URL of the pinning API (e.g. "https://api.web3.storage")
    pub api_url: String,
    /// Base URL of the read gateway (e.g. "https://w3s.link")
    pub gateway_url: String,
    /// Bearer token for uploads
    pub token: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpContentStoreConfig {
    /// Build from the `[content_store]` config section and a resolved token
    pub fn from_section(section: &ContentStoreSection, token: String) -> Self {
        Self {
            api_url: section.api_url.clone(),
            gateway_url: section.gateway_url.clone(),
            token,
            timeout: Duration::from_millis(section.timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    cid: String,
}

/// Content store reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpContentStore {
    config: HttpContentStoreConfig,
    client: reqwest::Client,
}

impl HttpContentStore {
    pub fn new(config: HttpContentStoreConfig) -> Result<Self, ContentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ContentError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn upload_url(&self) -> String {
        format!("{}/upload", self.config.api_url.trim_end_matches('/'))
    }

    /// Error bodies may echo the credential back
    fn redact(&self, text: &str) -> String {
        if self.config.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.config.token, "[redacted]")
        }
    }

    fn gateway_url(&self, cid: &str) -> String {
        format!("{}/ipfs/{cid}", self.config.gateway_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ContentBackend for HttpContentStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(&self, filename: &str, payload: Bytes) -> Result<String, ContentError> {
        let url = self.upload_url();
        debug!(url = %url, filename, bytes = payload.len(), "Uploading document");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .header("X-Name", filename)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ContentError::Transport(format!(
                        "upload timed out after {:?}",
                        self.config.timeout
                    ))
                } else {
                    ContentError::Transport(format!("upload request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ContentError::Transport(format!(
                "upload rejected with status {status}: {}",
                self.redact(&body)
            )));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| ContentError::Transport(format!("invalid upload response: {e}")))?;

        Ok(parsed.cid)
    }

    async fn retrieve(&self, cid: &str) -> Result<Bytes, ContentError> {
        let url = self.gateway_url(cid);
        debug!(url = %url, "Retrieving document");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ContentError::Retrieval(format!("gateway request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ContentError::Retrieval(format!("{cid} not found on gateway")));
        }
        if !status.is_success() {
            return Err(ContentError::Retrieval(format!(
                "gateway returned status {status} for {cid}"
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| ContentError::Retrieval(format!("failed to read gateway body: {e}")))
    }
}
