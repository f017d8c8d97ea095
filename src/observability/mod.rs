//! Observability: structured logging, metrics and health reporting

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthCheck, HealthMonitor, HealthStatus};
pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{job_span, pipeline_span};
