//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (sessions, relay volume, handshake latency)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_sessions_total` (counter): finished sessions by outcome
//! - `proxy_session_duration_seconds` (histogram): session lifetime
//! - `proxy_active_sessions` (gauge): current tunnel count
//! - `proxy_relay_bytes_total` (counter): relayed bytes by direction
//! - `proxy_backend_handshake_seconds` (histogram): TLS handshake latency by result

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session(outcome: &'static str, started: Instant) {
    ::metrics::counter!("proxy_sessions_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("proxy_session_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn set_active_sessions(count: u64) {
    ::metrics::gauge!("proxy_active_sessions").set(count as f64);
}

pub fn record_relay_bytes(direction: &'static str, bytes: u64) {
    ::metrics::counter!("proxy_relay_bytes_total", "direction" => direction).increment(bytes);
}

pub fn record_handshake(success: bool, started: Instant) {
    let result = if success { "ok" } else { "error" };
    ::metrics::histogram!("proxy_backend_handshake_seconds", "result" => result)
        .record(started.elapsed().as_secs_f64());
}
