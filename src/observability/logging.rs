//! Tracing subscriber setup.

use chrono::{DateTime, Local, TimeZone};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target of the Common Log Format access lines.
pub const CLF_TARGET: &str = "seeks_proxy::clf";

/// Default filter directive for a bare level such as `info`.
pub fn default_directive(level: &str) -> String {
    if level.contains('=') {
        level.to_string()
    } else {
        format!("seeks_proxy={level}")
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// One access line: `ip - - [date] "request" status bytes`.
pub fn clf_line<Tz: TimeZone>(ip: &str, request: &str, status: u16, bytes: u64, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{ip} - - [{}] \"{request}\" {status} {bytes}",
        at.format("%d/%b/%Y:%H:%M:%S %z")
    )
}

/// Emit an access line on the CLF target.
pub fn log_clf(ip: &str, request: &str, status: u16, bytes: u64) {
    let line = clf_line(ip, request, status, bytes, &Local::now());
    tracing::info!(target: CLF_TARGET, "{line}");
}
