//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## What lives here:
//! - **config**: Loaded once at startup, read-only afterwards
//! - **detector / analyzer**: The detection engine, constructed at startup and
//!   injected here so handlers never reach for globals
//! - **rate_limiter**: Per-client request budget for the prediction endpoints
//! - **metrics**: Request counters and active session count
//!
//! ## Arc<RwLock<T>> Pattern
//! Metrics are updated by every request, so they sit behind a lock. Everything
//! else is immutable after startup and only needs `Arc` to be shared.

use crate::config::AppConfig;
use crate::detection::{Detector, InferenceAdapter, WindowAnalyzer};
use crate::rate_limit::RateLimiter;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// Cloning is cheap: every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Engine used by the one-shot prediction endpoints
    pub detector: Arc<dyn Detector>,

    /// Engine adapter used by streaming sessions
    pub analyzer: Arc<dyn WindowAnalyzer>,

    /// Request budget per client IP
    pub rate_limiter: Arc<RateLimiter>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and streaming sessions.
///
/// ## Why these metrics matter:
/// - **request_count**: Total requests processed (for load monitoring)
/// - **error_count**: Total errors (for reliability monitoring)
/// - **active_sessions**: Open `/ws/stream` connections (for capacity planning)
/// - **endpoint_metrics**: Per-endpoint statistics
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Current number of open streaming sessions
    pub active_sessions: u32,

    /// Streaming sessions accepted since server start
    pub total_sessions: u64,

    /// Key: endpoint name (e.g., "POST /predict/file")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
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
    /// Create the state with the given configuration and engine.
    ///
    /// The streaming analyzer wraps the same detector, writing its temp WAV
    /// files into the configured temp directory.
    pub fn new(config: AppConfig, detector: Arc<dyn Detector>) -> Self {
        let analyzer: Arc<dyn WindowAnalyzer> =
            Arc::new(InferenceAdapter::new(Arc::clone(&detector), config.detector.temp_dir.clone()));
        Self::with_engines(config, detector, analyzer)
    }

    /// Create the state with an explicit streaming analyzer.
    pub fn with_engines(config: AppConfig, detector: Arc<dyn Detector>, analyzer: Arc<dyn WindowAnalyzer>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.upload.requests_per_minute));
        Self {
            config: Arc::new(config),
            detector,
            analyzer,
            rate_limiter,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    // A poisoned lock only means a panic happened mid-update; counters stay usable.
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: The API endpoint (e.g., "GET /health", "POST /predict/file")
    /// - **duration_ms**: How long the request took to process (in milliseconds)
    /// - **is_error**: Whether this request resulted in an error
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Called when a streaming socket actor starts.
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics_write();
        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
    }

    /// Called when a streaming socket actor stops. Never goes below zero.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics_write();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Cloning releases the lock before the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

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
