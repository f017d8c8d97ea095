//! Thread-safe metrics collection
//!
//! Atomic counters for the deployment pipeline, the content and registry
//! clients and the job workers, plus mutex-protected duration samples.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Duration samples kept per series
const MAX_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

pub struct MetricsCollector {
    // Pipeline
    pipelines_started: AtomicU64,
    pipelines_completed: AtomicU64,
    pipelines_failed: AtomicU64,
    pipelines_in_flight: AtomicU64,
    stage_failures: Mutex<BTreeMap<String, u64>>,
    pipeline_times: Mutex<Vec<u64>>,

    // Content store
    pins: AtomicU64,
    pin_cache_hits: AtomicU64,
    fetches: AtomicU64,
    fetch_cache_hits: AtomicU64,

    // Registry
    registrations: AtomicU64,
    unindexed_registrations: AtomicU64,

    // Jobs
    jobs_enqueued: AtomicU64,
    jobs_active: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_requeued: AtomicU64,
    job_times: Mutex<Vec<u64>>,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            pipelines_started: AtomicU64::new(0),
            pipelines_completed: AtomicU64::new(0),
            pipelines_failed: AtomicU64::new(0),
            pipelines_in_flight: AtomicU64::new(0),
            stage_failures: Mutex::new(BTreeMap::new()),
            pipeline_times: Mutex::new(Vec::new()),
            pins: AtomicU64::new(0),
            pin_cache_hits: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            fetch_cache_hits: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            unindexed_registrations: AtomicU64::new(0),
            jobs_enqueued: AtomicU64::new(0),
            jobs_active: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_requeued: AtomicU64::new(0),
            job_times: Mutex::new(Vec::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Pipeline metrics
    pub fn pipeline_started(&self) {
        self.pipelines_started.fetch_add(1, Ordering::Relaxed);
        self.pipelines_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pipeline_completed(&self, duration: Duration) {
        self.pipelines_completed.fetch_add(1, Ordering::Relaxed);
        self.decrement(&self.pipelines_in_flight);
        record_sample(&self.pipeline_times, duration);
    }

    pub fn pipeline_failed(&self, stage: &str, duration: Duration) {
        self.pipelines_failed.fetch_add(1, Ordering::Relaxed);
        self.decrement(&self.pipelines_in_flight);
        record_sample(&self.pipeline_times, duration);

        if let Ok(mut failures) = self.stage_failures.lock() {
            *failures.entry(stage.to_string()).or_insert(0) += 1;
        }
    }

    // Content metrics
    pub fn content_pinned(&self, cache_hit: bool) {
        self.pins.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.pin_cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn content_fetched(&self, cache_hit: bool) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.fetch_cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Registry metrics
    pub fn registration_confirmed(&self, indexed: bool) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
        if !indexed {
            self.unindexed_registrations.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Job metrics
    pub fn job_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_started(&self) {
        self.jobs_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_completed(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.decrement(&self.jobs_active);
        record_sample(&self.job_times, duration);
    }

    /// A failed attempt; `terminal` when no attempts remain
    pub fn job_failed(&self, duration: Duration, terminal: bool) {
        if terminal {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_retried.fetch_add(1, Ordering::Relaxed);
        }
        self.decrement(&self.jobs_active);
        record_sample(&self.job_times, duration);
    }

    /// The attempt ran but its outcome could not be written to the queue
    pub fn job_unrecorded(&self) {
        self.decrement(&self.jobs_active);
    }

    pub fn jobs_requeued(&self, count: usize) {
        self.jobs_requeued.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn decrement(&self, gauge: &AtomicU64) {
        let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.pipelines_started,
            &self.pipelines_completed,
            &self.pipelines_failed,
            &self.pipelines_in_flight,
            &self.pins,
            &self.pin_cache_hits,
            &self.fetches,
            &self.fetch_cache_hits,
            &self.registrations,
            &self.unindexed_registrations,
            &self.jobs_enqueued,
            &self.jobs_active,
            &self.jobs_completed,
            &self.jobs_retried,
            &self.jobs_failed,
            &self.jobs_requeued,
        ] {
            counter.store(0, Ordering::Relaxed);
        }

        if let Ok(mut failures) = self.stage_failures.lock() {
            failures.clear();
        }
        for samples in [&self.pipeline_times, &self.job_times] {
            if let Ok(mut samples) = samples.lock() {
                samples.clear();
            }
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let pipeline_times = DurationStats::from_samples(&self.pipeline_times);
        let job_times = DurationStats::from_samples(&self.job_times);
        let stage_failures = self
            .stage_failures
            .lock()
            .map(|failures| failures.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            pipeline: PipelineMetrics {
                started: self.pipelines_started.load(Ordering::Relaxed),
                completed: self.pipelines_completed.load(Ordering::Relaxed),
                failed: self.pipelines_failed.load(Ordering::Relaxed),
                in_flight: self.pipelines_in_flight.load(Ordering::Relaxed),
                failures_by_stage: stage_failures,
                duration: pipeline_times,
            },
            content: ContentMetrics {
                pins: self.pins.load(Ordering::Relaxed),
                pin_cache_hits: self.pin_cache_hits.load(Ordering::Relaxed),
                fetches: self.fetches.load(Ordering::Relaxed),
                fetch_cache_hits: self.fetch_cache_hits.load(Ordering::Relaxed),
            },
            registry: RegistryMetrics {
                registrations: self.registrations.load(Ordering::Relaxed),
                unindexed: self.unindexed_registrations.load(Ordering::Relaxed),
            },
            jobs: JobMetrics {
                enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
                active: self.jobs_active.load(Ordering::Relaxed),
                completed: self.jobs_completed.load(Ordering::Relaxed),
                retried: self.jobs_retried.load(Ordering::Relaxed),
                failed: self.jobs_failed.load(Ordering::Relaxed),
                requeued: self.jobs_requeued.load(Ordering::Relaxed),
                duration: job_times,
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub pipeline: PipelineMetrics,
    pub content: ContentMetrics,
    pub registry: RegistryMetrics,
    pub jobs: JobMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct PipelineMetrics {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: u64,
    pub failures_by_stage: BTreeMap<String, u64>,
    pub duration: DurationStats,
}

#[derive(Debug, Serialize)]
pub struct ContentMetrics {
    pub pins: u64,
    pub pin_cache_hits: u64,
    pub fetches: u64,
    pub fetch_cache_hits: u64,
}

#[derive(Debug, Serialize)]
pub struct RegistryMetrics {
    pub registrations: u64,
    pub unindexed: u64,
}

#[derive(Debug, Serialize)]
pub struct JobMetrics {
    pub enqueued: u64,
    pub active: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub requeued: u64,
    pub duration: DurationStats,
}

#[derive(Debug, Default, Serialize)]
pub struct DurationStats {
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl DurationStats {
    fn from_samples(samples: &Mutex<Vec<u64>>) -> Self {
        let Ok(samples) = samples.lock() else {
            return Self::default();
        };
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.clone();
        sorted.sort_unstable();

        Self {
            avg_ms: sorted.iter().sum::<u64>() as f64 / sorted.len() as f64,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
        }
    }
}

// Helper functions
fn record_sample(samples: &Mutex<Vec<u64>>, duration: Duration) {
    if let Ok(mut samples) = samples.lock() {
        samples.push(duration.as_millis() as u64);
        if samples.len() > MAX_SAMPLES {
            samples.remove(0);
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower = sorted_data[index.floor() as usize] as f64;
        let upper = sorted_data[index.ceil() as usize] as f64;
        lower + (upper - lower) * index.fract()
    }
}
