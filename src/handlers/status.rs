//! Status and health check handlers.
//!
//! - `/healthz` - fixed liveness token, never touches the browser
//! - `/status`  - session, capture and latency counters as JSON
//!
//! # Architecture
//!
//! ```text
//! HTTP Request ──> Axum Router ──> status_handler ──> CaptureStats
//!                                        │                │
//!                                        ▼                ▼
//!                              StatusResponse    LatencyHistogram
//!                                        │         + Counters
//!                                        ▼
//!                                   JSON Response
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument};

use crate::browser::CaptureFormat;
use crate::handlers::AppState;

/// Server version from Cargo.toml
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name from Cargo.toml
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

/// Body of `/healthz`
pub const LIVENESS_TOKEN: &str = "ok";

// ============================================================================
// Response Types
// ============================================================================

/// Detailed server status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server version (from Cargo.toml)
    pub version: String,

    /// Server name
    pub name: String,

    /// Server uptime in seconds
    pub uptime_seconds: u64,

    /// Browser session counters
    pub sessions: SessionMetrics,

    /// Successful captures by format
    pub captures: CaptureMetrics,

    /// Failed capture requests
    pub errors: u64,

    /// Memory usage metrics
    pub memory: MemoryMetrics,

    /// Capture latency statistics (percentiles)
    pub latency: LatencyMetrics,

    /// ISO8601 timestamp of when status was generated
    pub timestamp: String,
}

/// Browser session counters. `opened - closed` is the number of live
/// browser processes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Sessions whose browser started
    pub opened: u64,
    /// Sessions torn down again
    pub closed: u64,
    /// Sessions currently alive
    pub active: u64,
}

/// Successful captures by format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureMetrics {
    /// PNG captures
    pub png: u64,
    /// PDF captures
    pub pdf: u64,
}

/// Memory usage metrics collected from sysinfo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident Set Size - actual physical memory used (bytes)
    pub rss_bytes: u64,

    /// Virtual memory size (bytes)
    pub virtual_bytes: u64,
}

/// Request latency percentile metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// 50th percentile (median) latency in milliseconds
    pub p50_ms: f64,

    /// 95th percentile latency in milliseconds
    pub p95_ms: f64,

    /// 99th percentile latency in milliseconds
    pub p99_ms: f64,

    /// Total number of requests recorded
    pub total_requests: u64,

    /// Mean latency in milliseconds
    pub mean_ms: f64,

    /// Maximum latency recorded in milliseconds
    pub max_ms: f64,
}

// ============================================================================
// Latency Histogram
// ============================================================================

/// Thread-safe latency histogram for recording capture timings.
///
/// Tracks latencies from 1 microsecond to 10 minutes with 3 significant
/// figures; navigation may be unbounded, so longer values are clamped.
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: RwLock<Histogram<u64>>,
}

const MAX_TRACKED_US: u64 = 600_000_000;

impl LatencyHistogram {
    /// Create a new latency histogram.
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, MAX_TRACKED_US, 3).expect("Failed to create histogram");
        Self {
            inner: RwLock::new(histogram),
        }
    }

    /// Record a latency value in microseconds.
    pub fn record(&self, latency_us: u64) {
        let mut hist = self.inner.write();
        let _ = hist.record(latency_us.clamp(1, MAX_TRACKED_US));
    }

    /// Record a latency duration.
    pub fn record_duration(&self, duration: std::time::Duration) {
        self.record(duration.as_micros() as u64);
    }

    /// Get the total count of recorded values.
    pub fn count(&self) -> u64 {
        self.inner.read().len()
    }

    /// Get complete latency metrics in milliseconds.
    pub fn metrics(&self) -> LatencyMetrics {
        let hist = self.inner.read();
        LatencyMetrics {
            p50_ms: hist.value_at_percentile(50.0) as f64 / 1000.0,
            p95_ms: hist.value_at_percentile(95.0) as f64 / 1000.0,
            p99_ms: hist.value_at_percentile(99.0) as f64 / 1000.0,
            total_requests: hist.len(),
            mean_ms: hist.mean() / 1000.0,
            max_ms: hist.max() as f64 / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Capture Statistics
// ============================================================================

/// Process-wide counters for captures and browser sessions.
///
/// All fields are atomics or lock-protected, so the stats can be shared
/// freely between concurrent captures.
#[derive(Debug)]
pub struct CaptureStats {
    start_time: Instant,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    png_captures: AtomicU64,
    pdf_captures: AtomicU64,
    error_count: AtomicU64,
    latency_histogram: LatencyHistogram,
}

impl CaptureStats {
    /// Create zeroed statistics starting now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            png_captures: AtomicU64::new(0),
            pdf_captures: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            latency_histogram: LatencyHistogram::new(),
        }
    }

    /// Get the server uptime in seconds.
    #[inline]
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// A browser process started
    #[inline]
    pub fn record_session_opened(&self) -> u64 {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// A browser process was torn down
    #[inline]
    pub fn record_session_closed(&self) -> u64 {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Sessions opened so far
    #[inline]
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    /// Sessions closed so far
    #[inline]
    pub fn sessions_closed(&self) -> u64 {
        self.sessions_closed.load(Ordering::Relaxed)
    }

    /// Sessions currently alive
    #[inline]
    pub fn active_sessions(&self) -> u64 {
        self.sessions_opened()
            .saturating_sub(self.sessions_closed())
    }

    /// A capture succeeded
    pub fn record_capture(&self, format: CaptureFormat) -> u64 {
        let counter = match format {
            CaptureFormat::Png => &self.png_captures,
            CaptureFormat::Pdf => &self.pdf_captures,
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Successful captures by format
    pub fn captures(&self) -> CaptureMetrics {
        CaptureMetrics {
            png: self.png_captures.load(Ordering::Relaxed),
            pdf: self.pdf_captures.load(Ordering::Relaxed),
        }
    }

    /// A capture request failed
    #[inline]
    pub fn record_error(&self) -> u64 {
        self.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get the total error count.
    #[inline]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Record how long a capture request took
    #[inline]
    pub fn record_latency(&self, duration: std::time::Duration) {
        self.latency_histogram.record_duration(duration);
    }

    /// Get the latency metrics.
    #[inline]
    pub fn latency_metrics(&self) -> LatencyMetrics {
        self.latency_histogram.metrics()
    }

    fn session_metrics(&self) -> SessionMetrics {
        let opened = self.sessions_opened();
        let closed = self.sessions_closed();
        SessionMetrics {
            opened,
            closed,
            active: opened.saturating_sub(closed),
        }
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// System Metrics Collection
// ============================================================================

/// Collect memory metrics for the current process using sysinfo.
fn collect_memory_metrics() -> MemoryMetrics {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        Some(process) => MemoryMetrics {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        },
        None => {
            debug!("Could not find current process in sysinfo");
            MemoryMetrics::default()
        }
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// Liveness probe.
///
/// # Route
/// `GET /healthz`
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, LIVENESS_TOKEN)
}

/// Detailed status endpoint handler.
///
/// # Route
/// `GET /status`
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/status
/// # {
/// #   "version": "0.1.0",
/// #   "name": "snapshot-server",
/// #   "uptime_seconds": 3600,
/// #   "sessions": { "opened": 12, "closed": 12, "active": 0 },
/// #   "captures": { "png": 10, "pdf": 1 },
/// #   "errors": 1,
/// #   ...
/// # }
/// ```
#[instrument(skip_all)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Status check requested");
    let stats = state.pipeline.stats();

    let response = StatusResponse {
        version: SERVER_VERSION.to_string(),
        name: SERVER_NAME.to_string(),
        uptime_seconds: stats.uptime_seconds(),
        sessions: stats.session_metrics(),
        captures: stats.captures(),
        errors: stats.error_count(),
        memory: collect_memory_metrics(),
        latency: stats.latency_metrics(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_stats_new() {
        let stats = CaptureStats::new();
        assert_eq!(stats.sessions_opened(), 0);
        assert_eq!(stats.active_sessions(), 0);
        assert_eq!(stats.error_count(), 0);
        assert!(stats.uptime_seconds() < 1);
    }

    #[test]
    fn test_session_counters() {
        let stats = CaptureStats::new();

        assert_eq!(stats.record_session_opened(), 1);
        assert_eq!(stats.record_session_opened(), 2);
        assert_eq!(stats.active_sessions(), 2);

        assert_eq!(stats.record_session_closed(), 1);
        assert_eq!(stats.active_sessions(), 1);
        stats.record_session_closed();
        assert_eq!(stats.active_sessions(), 0);
    }

    #[test]
    fn test_capture_counters_by_format() {
        let stats = CaptureStats::new();
        stats.record_capture(CaptureFormat::Png);
        stats.record_capture(CaptureFormat::Png);
        stats.record_capture(CaptureFormat::Pdf);

        let captures = stats.captures();
        assert_eq!(captures.png, 2);
        assert_eq!(captures.pdf, 1);
    }

    #[test]
    fn test_latency_histogram() {
        let histogram = LatencyHistogram::new();

        histogram.record(1000);
        histogram.record(2000);
        histogram.record(5000);
        histogram.record(10000);
        histogram.record(50000);

        assert_eq!(histogram.count(), 5);
        let metrics = histogram.metrics();
        assert!(metrics.p50_ms > 0.0);
        assert!(metrics.p95_ms >= metrics.p50_ms);
        assert!(metrics.p99_ms >= metrics.p95_ms);
        assert!((50.0..=51.0).contains(&metrics.max_ms));
    }

    #[test]
    fn test_latency_histogram_clamps_out_of_range() {
        let histogram = LatencyHistogram::new();
        histogram.record(0);
        histogram.record(u64::MAX);
        assert_eq!(histogram.count(), 2);
    }

    #[test]
    fn test_collect_memory_metrics() {
        let metrics = collect_memory_metrics();
        assert!(metrics.rss_bytes > 0);
    }

    #[test]
    fn test_status_response_serialization() {
        let response = StatusResponse {
            version: "0.1.0".to_string(),
            name: "snapshot-server".to_string(),
            uptime_seconds: 3600,
            sessions: SessionMetrics {
                opened: 3,
                closed: 3,
                active: 0,
            },
            captures: CaptureMetrics { png: 2, pdf: 1 },
            errors: 0,
            memory: MemoryMetrics::default(),
            latency: LatencyMetrics::default(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };

        let json = serde_json::to_string(&response).expect("Failed to serialize");
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"sessions\":{\"opened\":3,\"closed\":3,\"active\":0}"));
    }

    #[test]
    fn test_server_constants() {
        assert_eq!(SERVER_NAME, "snapshot-server");
        assert!(!SERVER_VERSION.is_empty());
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_stats_thread_safety() {
        use std::thread;

        let stats = Arc::new(CaptureStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_session_opened();
                    stats.record_capture(CaptureFormat::Png);
                    stats.record_latency(std::time::Duration::from_millis(1));
                    stats.record_session_closed();
                }
            }));
        }

        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        assert_eq!(stats.sessions_opened(), 10_000);
        assert_eq!(stats.active_sessions(), 0);
        assert_eq!(stats.captures().png, 10_000);
        assert_eq!(stats.latency_metrics().total_requests, 10_000);
    }
}
