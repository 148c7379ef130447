//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::routing::actions::ActionSettings;
use crate::routing::forward::ForwardType;

/// Root configuration for the intercepting proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Runtime feature switches.
    pub features: FeatureConfig,

    /// Buffer, pool and retry limits.
    pub limits: LimitsConfig,

    /// Forwarding rules, first match wins.
    pub forward: Vec<ForwardRuleConfig>,

    /// Action rules, every match merges in order.
    pub actions: Vec<ActionRuleConfig>,

    /// Named text filters referenced from actions.
    pub filters: Vec<TextFilterConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8250").
    pub bind_address: String,

    /// Maximum concurrently served client connections.
    pub max_client_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8250".to_string(),
            max_client_connections: 128,
        }
    }
}

/// Timeout configuration for socket operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Readiness wait on client and server sockets, in seconds.
    pub socket_timeout_secs: u64,

    /// Upstream keep-alive timeout, in seconds.
    pub keep_alive_timeout_secs: u64,

    /// Connection establishment timeout, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            socket_timeout_secs: 300,
            keep_alive_timeout_secs: 5,
            connect_timeout_secs: 30,
        }
    }
}

/// Feature switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Keep client connections open between requests.
    pub keep_alive: bool,

    /// Reuse idle upstream connections across clients.
    pub connection_sharing: bool,

    /// Accept requests with origin-form request lines, using `Host:`.
    pub accept_intercepted_requests: bool,

    /// Honour the `X-Filter: No` client header.
    pub http_toggle: bool,

    /// Whether filtering and toggle-dependent interceptors are enabled.
    pub toggled_on: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            connection_sharing: true,
            accept_intercepted_requests: false,
            http_toggle: true,
            toggled_on: true,
        }
    }
}

/// Resource limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound for any per-connection buffer, in bytes.
    pub buffer_limit: usize,

    /// Extra attempts for forwarded connects that fail with invalid input.
    pub forwarded_connect_retries: u32,

    /// Slots in the upstream connection pool.
    pub pool_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            buffer_limit: 4 * 1024 * 1024,
            forwarded_connect_retries: 0,
            pool_capacity: 100,
        }
    }
}

/// One `[[forward]]` block.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ForwardRuleConfig {
    /// URL pattern, empty matches everything.
    pub pattern: String,

    #[serde(rename = "type")]
    pub forward_type: ForwardType,

    /// SOCKS gateway `host[:port]`.
    pub gateway: Option<String>,

    /// HTTP parent proxy `host[:port]`, `"."` for none.
    pub forward: Option<String>,
}

/// One `[[actions]]` block.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ActionRuleConfig {
    #[serde(default)]
    pub pattern: String,

    #[serde(flatten)]
    pub settings: ActionSettings,
}

/// One `[[filters]]` block.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TextFilterConfig {
    pub name: String,
    pub pattern: String,
    pub replacement: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9250".to_string(),
        }
    }
}
