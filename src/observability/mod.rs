//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (connection_id, request_id, host)
//!     → logging.rs installs the subscriber (EnvFilter + fmt)
//!     → metrics.rs records counters, gauges and histograms
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Prometheus scrape endpoint when metrics are enabled
//! ```
//!
//! # Design Decisions
//! - RUST_LOG overrides the configured level
//! - One span per client connection carries the connection id
//! - Metrics go through the `metrics` facade and cost nothing without an exporter

pub mod logging;
pub mod metrics;
