//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): exchanges by outcome
//! - `proxy_request_duration_seconds` (histogram): exchange latency
//! - `proxy_active_connections` (gauge): open client connections
//! - `proxy_pool_reuse_total` (counter): upstream sockets taken from the pool
//! - `proxy_pool_evictions_total` (counter): pooled sockets closed by a sweep
//! - `proxy_bytes_relayed_total` (counter): body bytes sent to clients

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    Crunched,
    Tunneled,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Forwarded => "forwarded",
            Outcome::Crunched => "crunched",
            Outcome::Tunneled => "tunneled",
            Outcome::Error => "error",
        }
    }
}

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(outcome: Outcome, start: Instant) {
    metrics::counter!("proxy_requests_total", "outcome" => outcome.as_str()).increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_connection_opened() {
    metrics::gauge!("proxy_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    metrics::gauge!("proxy_active_connections").decrement(1.0);
}

pub fn record_pool_reuse() {
    metrics::counter!("proxy_pool_reuse_total").increment(1);
}

pub fn record_pool_eviction() {
    metrics::counter!("proxy_pool_evictions_total").increment(1);
}

pub fn record_bytes_relayed(bytes: u64) {
    metrics::counter!("proxy_bytes_relayed_total").increment(bytes);
}
