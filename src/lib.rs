//! Seeks proxy: an HTTP/1.x intercepting proxy with header rewriting,
//! content filtering, parent proxy and SOCKS forwarding, and upstream
//! connection sharing.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod plugins;
pub mod pool;
pub mod proxy;
pub mod resilience;
pub mod rewrite;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use config::ActiveConfig;
pub use error::{ProxyError, ProxyResult};
pub use lifecycle::Shutdown;
pub use plugins::PluginRegistry;
pub use proxy::ProxyServer;
