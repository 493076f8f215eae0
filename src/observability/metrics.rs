//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, handler
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `mock_tasks_created_total` (counter): synthetic tasks issued
//! - `mock_tasks_delivered_total` (counter): completed outcomes handed out
//! - `mock_rewrite_failures_total` (counter): fail-open rewrites by handler
//! - `mock_tasks_pending` / `mock_tasks_completed` (gauges): registry sizes
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, handler: &'static str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("handler", handler.to_string()),
    ];
    metrics::counter!("proxy_requests_total", &labels).increment(1);
    metrics::histogram!("proxy_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_task_created() {
    metrics::counter!("mock_tasks_created_total").increment(1);
}

pub fn record_task_delivered() {
    metrics::counter!("mock_tasks_delivered_total").increment(1);
}

pub fn record_rewrite_failure(handler: &'static str) {
    metrics::counter!("mock_rewrite_failures_total", "handler" => handler).increment(1);
}

pub fn record_task_gauges(pending: usize, completed: usize) {
    metrics::gauge!("mock_tasks_pending").set(pending as f64);
    metrics::gauge!("mock_tasks_completed").set(completed as f64);
}
