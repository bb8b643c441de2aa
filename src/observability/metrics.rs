//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, service
//! - `gateway_rate_limited_total` (counter): rejections by class
//! - `gateway_breaker_trips_total` (counter): breaker openings by service
//! - `gateway_request_duration_seconds` (histogram): pipeline latency
//!
//! # Design Decisions
//! - `metrics` facade in the hot path; the Prometheus exporter runs on a
//!   side port and is optional
//! - Aggregate counters for the authenticated `/metrics` route live in
//!   `health::aggregator` (the facade is write-only)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on its side port.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(error) => tracing::error!(error = %error, "Failed to install Prometheus exporter"),
    }
}

/// Record one completed (or rejected) request.
pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "service" => service.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a rate-limit rejection.
pub fn record_rate_limited(class: &str) {
    counter!("gateway_rate_limited_total", "class" => class.to_string()).increment(1);
}

/// Record a circuit breaker trip.
pub fn record_breaker_trip(service: &str) {
    counter!("gateway_breaker_trips_total", "service" => service.to_string()).increment(1);
}
