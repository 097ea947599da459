//! Prometheus metrics for Gatewayz observability.
//!
//! Exposes metrics compatible with Prometheus/OpenMetrics format:
//! - `gatewayz_requests_total{path,status}` - Counter of forwarded requests
//! - `gatewayz_request_duration_seconds` - Histogram of request durations
//! - `gatewayz_active_requests{key}` - Gauge of in-flight requests per key prefix
//! - `gatewayz_concurrency_rejections_total` - Counter of concurrency-gate 429s
//! - `gatewayz_endpoint_rejections_total{endpoint}` - Counter of window-limiter 429s
//! - `gatewayz_uptime_seconds` - Gauge of server uptime

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

/// Global Prometheus handle for rendering metrics
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global server start time for uptime calculation
static METRICS_START_TIME: OnceLock<Instant> = OnceLock::new();

/// Custom histogram buckets optimized for LLM API latency distribution.
///
/// LLM APIs have bimodal latency patterns: fast responses (cache hits, short
/// prompts) land in 100ms - 1s, long generations in 5s - 60s+.
const LLM_LATENCY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];

/// Initialize Prometheus metrics recorder.
/// Must be called once at application startup before any metrics are recorded.
///
/// Returns the handle that can be used to render metrics as text.
pub fn init_metrics() -> PrometheusHandle {
    let _ = METRICS_START_TIME.get_or_init(Instant::now);

    let handle = PROMETHEUS_HANDLE.get_or_init(|| {
        let builder = PrometheusBuilder::new()
            .set_buckets(LLM_LATENCY_BUCKETS)
            .expect("Failed to set histogram buckets");
        let handle = builder
            .install_recorder()
            .expect("Failed to install Prometheus metrics recorder");

        describe_counter!("gatewayz_requests_total", "Total number of proxy requests forwarded");
        describe_histogram!("gatewayz_request_duration_seconds", "Request duration in seconds");
        describe_gauge!(
            "gatewayz_active_requests",
            "In-flight inference requests per truncated key prefix"
        );
        describe_counter!(
            "gatewayz_concurrency_rejections_total",
            "Requests rejected by the per-key concurrency gate"
        );
        describe_counter!(
            "gatewayz_endpoint_rejections_total",
            "Requests rejected by per-endpoint window budgets"
        );
        describe_gauge!("gatewayz_uptime_seconds", "Server uptime in seconds");

        handle
    });

    handle.clone()
}

/// Get the Prometheus handle for rendering metrics.
/// Returns None if metrics have not been initialized.
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Record a forwarded request with labels.
///
/// # Arguments
/// * `path` - The request path (bounded: only the fixed route set is recorded)
/// * `status` - HTTP status code category ("2xx", "4xx", "5xx")
/// * `duration_ms` - Request duration in milliseconds
pub fn record_request(path: &str, status: &str, duration_ms: u64) {
    let labels = [("path", path.to_string()), ("status", status.to_string())];

    counter!("gatewayz_requests_total", &labels).increment(1);

    let duration_seconds = duration_ms as f64 / 1000.0;
    histogram!("gatewayz_request_duration_seconds", &labels).record(duration_seconds);
}

/// Bump the in-flight gauge for a key prefix. Called on slot acquisition.
pub fn increment_active_requests(key_prefix: &str) {
    let labels = [("key", key_prefix.to_string())];
    gauge!("gatewayz_active_requests", &labels).increment(1.0);
}

/// Drop the in-flight gauge for a key prefix. Called on slot release.
pub fn decrement_active_requests(key_prefix: &str) {
    let labels = [("key", key_prefix.to_string())];
    gauge!("gatewayz_active_requests", &labels).decrement(1.0);
}

pub fn record_concurrency_rejection() {
    counter!("gatewayz_concurrency_rejections_total").increment(1);
}

pub fn record_endpoint_rejection(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!("gatewayz_endpoint_rejections_total", &labels).increment(1);
}

/// Update uptime gauge.
/// Should be called periodically or on metrics render.
pub fn update_uptime_gauge() {
    if let Some(start) = METRICS_START_TIME.get() {
        let uptime = start.elapsed().as_secs_f64();
        gauge!("gatewayz_uptime_seconds").set(uptime);
    }
}

/// Render all metrics in Prometheus text format.
pub fn render_metrics() -> String {
    update_uptime_gauge();

    if let Some(handle) = get_prometheus_handle() {
        handle.render()
    } else {
        String::from("# Metrics not initialized\n")
    }
}

/// Convert HTTP status code to category for metrics labels.
pub fn status_category(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}
