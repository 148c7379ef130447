//! Direct and forwarded connects.

use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};

use crate::gateway::socks::{socks4_connect, socks5_connect};
use crate::gateway::GatewayError;
use crate::http::request::HttpRequest;
use crate::resilience::backoff::calculate_backoff;
use crate::routing::forward::{ForwardSpec, ForwardType};

const RETRY_BASE_MS: u64 = 50;
const RETRY_MAX_MS: u64 = 1000;

/// Open a TCP connection to `host:port`, trying every resolved address
/// within `timeout`.
pub async fn connect_to(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, GatewayError> {
    let addrs: Vec<_> = match tokio::time::timeout(timeout, lookup_host((host, port))).await {
        Ok(Ok(addrs)) => addrs.collect(),
        Ok(Err(e)) => {
            tracing::debug!(host = %host, error = %e, "Could not resolve host");
            return Err(GatewayError::Resolve { host: host.to_string() });
        }
        Err(_) => {
            return Err(GatewayError::Timeout {
                host: host.to_string(),
                port,
            })
        }
    };
    if addrs.is_empty() {
        return Err(GatewayError::Resolve { host: host.to_string() });
    }

    let mut last_error = None;
    for addr in addrs {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                tracing::debug!(host = %host, address = %addr, "Connected");
                return Ok(stream);
            }
            Ok(Err(e)) => {
                tracing::debug!(host = %host, address = %addr, error = %e, "Connect attempt failed");
                last_error = Some(GatewayError::Connect {
                    host: host.to_string(),
                    port,
                    source: e,
                });
            }
            Err(_) => {
                last_error = Some(GatewayError::Timeout {
                    host: host.to_string(),
                    port,
                });
            }
        }
    }

    Err(last_error.unwrap_or_else(|| GatewayError::Resolve { host: host.to_string() }))
}

/// Connect to the destination of `http`, through the parent proxy and
/// SOCKS gateway named by `fwd`.
pub async fn forwarded_connect(
    fwd: &ForwardSpec,
    http: &HttpRequest,
    timeout: Duration,
) -> Result<TcpStream, GatewayError> {
    let (dest_host, dest_port) = match &fwd.forward {
        Some(parent) => (parent.host.as_str(), parent.port),
        None => (http.host.as_str(), http.port),
    };

    let stream = match fwd.forward_type {
        ForwardType::None => connect_to(dest_host, dest_port, timeout).await?,
        ForwardType::Socks4 | ForwardType::Socks4a => socks4_connect(fwd, dest_host, dest_port, timeout).await?,
        ForwardType::Socks5 => socks5_connect(fwd, dest_host, dest_port, timeout).await?,
    };

    tracing::debug!(
        host = %http.host,
        port = http.port,
        forward_type = %fwd.forward_type,
        "Created new connection"
    );
    Ok(stream)
}

/// [`forwarded_connect`] with up to `retries` extra attempts on
/// invalid-input failures.
pub async fn forwarded_connect_with_retries(
    fwd: &ForwardSpec,
    http: &HttpRequest,
    timeout: Duration,
    retries: u32,
) -> Result<TcpStream, GatewayError> {
    let mut attempt = 0;
    loop {
        match forwarded_connect(fwd, http, timeout).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_invalid_input() && attempt < retries => {
                attempt += 1;
                tracing::error!(
                    attempt,
                    hostport = %http.hostport,
                    error = %e,
                    "Failed request to connect, trying again"
                );
                tokio::time::sleep(calculate_backoff(attempt, RETRY_BASE_MS, RETRY_MAX_MS)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
