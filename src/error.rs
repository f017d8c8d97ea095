//! Crate-level error type
//!
//! Each component has its own error enum. They all fold into [`DeployError`],
//! which classifies them into an [`ErrorKind`] and an HTTP status, and
//! renders messages that are safe to hand to clients.

use crate::config::ConfigError;
use crate::content::ContentError;
use crate::queue::QueueError;
use crate::registry::ChainError;
use crate::store::PersistenceError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATED_SUFFIX: &str = "...[truncated]";

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret|authorization)[=:]\s*\S+").expect("valid regex")
});

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("valid regex"));

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("valid regex")
});

/// Error classification shared by logs, metrics and the HTTP boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transient,
    Retrieval,
    Chain,
    Persistence,
    NotFound,
    Queue,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Retrieval => "retrieval",
            ErrorKind::Chain => "chain",
            ErrorKind::Persistence => "persistence",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Queue => "queue",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status for errors of this kind
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Transient | ErrorKind::Retrieval | ErrorKind::Chain => 502,
            ErrorKind::Persistence | ErrorKind::Queue | ErrorKind::Config | ErrorKind::Internal => {
                500
            }
        }
    }
}

/// Main error type for deployment operations
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DeployError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Validation { .. } => ErrorKind::Validation,
            DeployError::Content(ContentError::Validation(_)) => ErrorKind::Validation,
            DeployError::Content(e) if e.is_retrieval() => ErrorKind::Retrieval,
            DeployError::Content(_) => ErrorKind::Transient,
            DeployError::Chain(_) => ErrorKind::Chain,
            DeployError::Persistence(_) => ErrorKind::Persistence,
            DeployError::Queue(_) => ErrorKind::Queue,
            DeployError::NotFound { .. } => ErrorKind::NotFound,
            DeployError::Config(_) => ErrorKind::Config,
            DeployError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Client-facing message with secrets redacted
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.public_message(),
            kind: self.kind(),
        }
    }
}

/// JSON body returned to clients for a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub kind: ErrorKind,
}

/// Redact credentials and sensitive paths and cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let sanitized = BEARER_PATTERN.replace_all(&sanitized, "Bearer ***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATED_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATED_SUFFIX);
    }

    sanitized
}

/// Result type for deployment operations
pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_constructor() {
        let error = DeployError::validation("Missing config");
        assert_eq!(error.to_string(), "Invalid request: Missing config");
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.status_code(), 400);
    }

    #[test]
    fn test_not_found_and_internal() {
        assert_eq!(DeployError::not_found("agent 7").status_code(), 404);
        assert_eq!(DeployError::internal("unexpected").status_code(), 500);
    }

    #[test]
    fn test_content_errors_are_classified() {
        let invalid: DeployError = ContentError::Validation("modules must not be empty".into()).into();
        assert_eq!(invalid.kind(), ErrorKind::Validation);

        let transport: DeployError = ContentError::Exhausted {
            attempts: 3,
            last: Box::new(ContentError::Transport("timeout".into())),
        }
        .into();
        assert_eq!(transport.kind(), ErrorKind::Transient);
        assert_eq!(transport.status_code(), 502);

        let retrieval: DeployError = ContentError::Retrieval("not JSON".into()).into();
        assert_eq!(retrieval.kind(), ErrorKind::Retrieval);
    }

    #[test]
    fn test_component_errors_are_classified() {
        let chain: DeployError = ChainError::Reverted {
            tx_hash: "0x01".into(),
        }
        .into();
        assert_eq!(chain.kind(), ErrorKind::Chain);
        assert_eq!(chain.status_code(), 502);

        let persistence: DeployError = PersistenceError::Unavailable("db down".into()).into();
        assert_eq!(persistence.status_code(), 500);

        let queue: DeployError = QueueError::Unavailable("queue down".into()).into();
        assert_eq!(queue.kind(), ErrorKind::Queue);
    }

    #[test]
    fn test_error_message_sanitization() {
        let error = DeployError::internal("Failed to authenticate: password=secret123 token=abc456");
        let payload = error.to_payload();

        assert!(!payload.error.contains("secret123"));
        assert!(!payload.error.contains("abc456"));
        assert!(payload.error.contains("password=***"));
        assert!(payload.error.contains("token=***"));
    }

    #[test]
    fn test_bearer_token_redaction() {
        let sanitized = sanitize_error_message("upload rejected for Bearer eyJhbGciOi.abc-123");
        assert!(!sanitized.contains("eyJhbGciOi"));
        assert!(sanitized.contains("Bearer ***"));
    }

    #[test]
    fn test_file_path_redaction() {
        let sanitized = sanitize_error_message("Failed to read /home/user/.ssh/id_rsa");
        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("id_rsa"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_payload_serialization() {
        let payload = DeployError::not_found("agent 3").to_payload();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["error"], "Not found: agent 3");
    }
}
