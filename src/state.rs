//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler and by the worker
//! loop. One `AppState` exists per process; handlers receive clones, all
//! of which share the same underlying store, queue and metrics.
//!
//! ## Thread Safety Pattern:
//! Mutable pieces sit behind `Arc<RwLock<T>>`: many concurrent readers, or
//! one writer at a time. Locks are only held for the duration of a map or
//! counter operation, never across an `.await`. The job store and queue
//! bring their own internal locking and are shared as cheap clones.

use crate::config::AppConfig;
use crate::jobs::{JobController, JobQueue, JobStore};
use crate::storage::Storage;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (updated by middleware on every request)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Authoritative job records; source of truth for status and results
    pub store: JobStore,

    /// Bounded FIFO admission onto the single GPU
    pub queue: JobQueue,

    /// The public job contract the handlers call
    pub controller: JobController,

    /// Blob storage for uploaded media and produced transcripts
    pub storage: Arc<dyn Storage>,

    /// When the server started (immutable, safe to share directly)
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Jobs accepted into the queue since server start
    pub jobs_submitted: u64,

    /// Submissions rejected by the capacity bound since server start.
    /// Tracked separately from errors: backpressure is expected behavior.
    pub jobs_rejected: u64,

    /// Detailed metrics per API endpoint ("GET /health" etc.)
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: JobStore,
        queue: JobQueue,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let controller = JobController::new(store.clone(), queue.clone());
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            store,
            queue,
            controller,
            storage,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration. Cloning releases the lock
    /// immediately so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a job accepted into the queue.
    pub fn record_job_submitted(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.jobs_submitted += 1;
    }

    /// Count a submission bounced by backpressure.
    pub fn record_job_rejected(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.jobs_rejected += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    /// Clones the data so no lock is held while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            jobs_submitted: metrics.jobs_submitted,
            jobs_rejected: metrics.jobs_rejected,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn test_state() -> AppState {
        let config = AppConfig::default();
        let store = JobStore::new();
        let queue = JobQueue::new(config.queue.capacity);
        AppState::new(config, store, queue, Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_metrics_counters() {
        let state = test_state();
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();
        state.record_job_submitted();
        state.record_job_rejected();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.jobs_submitted, 1);
        assert_eq!(snapshot.jobs_rejected, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = test_state();
        state.record_endpoint_request("POST /api/v1/jobs", 10, false);
        state.record_endpoint_request("POST /api/v1/jobs", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /api/v1/jobs"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_update_config_validates() {
        let state = test_state();
        let mut bad = state.get_config();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());
        // Original config untouched after the rejected update
        assert_eq!(state.get_config().server.port, 8080);
    }
}
