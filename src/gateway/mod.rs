//! Upstream connection establishment.
//!
//! # Data Flow
//! ```text
//! ForwardSpec + destination
//!     → connect.rs::forwarded_connect
//!         type none    → connect_to(parent proxy or destination)
//!         type socks4  → socks.rs (target resolved locally)
//!         type socks4a → socks.rs (target sent as a name)
//!         type socks5  → socks.rs (two round trips)
//!     → TcpStream ready for the HTTP request
//! ```
//!
//! # Design Decisions
//! - Every failure carries the diagnostic text shown on the error page
//! - Sockets are owned values, so a failed negotiation closes them on drop
//! - Negotiation is generic over the stream so it is tested on in-memory pipes

pub mod connect;
pub mod socks;

use thiserror::Error;

pub use connect::{connect_to, forwarded_connect, forwarded_connect_with_retries};

/// Failure to reach the destination, a gateway or a parent proxy.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no gateway host specified")]
    MissingGateway,

    #[error("could not resolve target host {host}")]
    Resolve { host: String },

    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {host}:{port} timed out")]
    Timeout { host: String, port: u16 },

    #[error("connection to the SOCKS4 gateway {gateway} failed")]
    Socks4Unreachable { gateway: String },

    #[error("SOCKS4 negotiation write failed.")]
    Socks4Write,

    #[error("SOCKS4 negotiation read failed.")]
    Socks4Read,

    #[error("SOCKS request rejected or failed.")]
    Socks4Rejected,

    #[error("SOCKS request rejected because SOCKS server cannot connect to identd on the client.")]
    Socks4IdentFailed,

    #[error("SOCKS request rejected because the client program and identd report different user-ids.")]
    Socks4IdentConflict,

    #[error("SOCKS request rejected for reason code {0}.")]
    Socks4Unknown(u8),

    #[error("target host name is longer than 255 characters")]
    Socks5HostTooLong,

    #[error("socks5 server unreachable")]
    Socks5Unreachable,

    #[error("SOCKS5 negotiation write failed")]
    Socks5Write,

    #[error("SOCKS5 negotiation read failed")]
    Socks5Read,

    #[error("SOCKS5 negotiation protocol version error")]
    Socks5Version,

    #[error("SOCKS5 authentication required")]
    Socks5AuthRequired,

    #[error("SOCKS5 negotiation protocol error")]
    Socks5Protocol,

    #[error("{}", socks5_reply_message(*.0))]
    Socks5Reply(u8),
}

impl GatewayError {
    /// Failures worth another attempt: unresolvable names and rejected
    /// SOCKS negotiations.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            GatewayError::MissingGateway
                | GatewayError::Resolve { .. }
                | GatewayError::Socks4Rejected
                | GatewayError::Socks5HostTooLong
                | GatewayError::Socks5Read
                | GatewayError::Socks5Version
                | GatewayError::Socks5AuthRequired
                | GatewayError::Socks5Protocol
                | GatewayError::Socks5Reply(_)
        )
    }

    /// The destination name did not resolve.
    pub fn is_resolve_failure(&self) -> bool {
        matches!(self, GatewayError::Resolve { .. })
    }
}

/// Text for a SOCKS5 CONNECT reply code.
pub fn socks5_reply_message(code: u8) -> &'static str {
    match code {
        0x00 => "everything's peachy",
        0x01 => "SOCKS5 request failed",
        0x02 => "SOCKS5 request denied",
        0x03 => "SOCKS5 network unreachable",
        0x04 => "SOCKS5 host unreachable",
        0x05 => "SOCKS5 connection refused",
        0x06 => "SOCKS5 TTL expired",
        0x07 => "SOCKS5 client protocol error",
        0x08 => "SOCKS5 domain names unsupported",
        _ => "SOCKS5 negotiation protocol error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socks4_codes_have_distinct_messages() {
        let messages = [
            GatewayError::Socks4Rejected.to_string(),
            GatewayError::Socks4IdentFailed.to_string(),
            GatewayError::Socks4IdentConflict.to_string(),
            GatewayError::Socks4Unknown(42).to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            assert!(!a.is_empty());
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(messages[3], "SOCKS request rejected for reason code 42.");
    }

    #[test]
    fn socks5_reply_text() {
        assert_eq!(GatewayError::Socks5Reply(5).to_string(), "SOCKS5 connection refused");
        assert_eq!(GatewayError::Socks5Reply(0x42).to_string(), "SOCKS5 negotiation protocol error");
    }

    #[test]
    fn retry_classification() {
        assert!(GatewayError::Resolve { host: "x".into() }.is_invalid_input());
        assert!(GatewayError::Socks5AuthRequired.is_invalid_input());
        assert!(!GatewayError::Timeout { host: "x".into(), port: 1 }.is_invalid_input());
    }
}
