//! Seeks proxy
//!
//! An intercepting HTTP/1.x proxy that rewrites headers, filters
//! content and shares upstream connections between clients.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                     SEEKS PROXY                       │
//!                    │                                                       │
//!   Client Request   │  ┌─────────┐   ┌──────────┐   ┌───────────────────┐  │
//!   ─────────────────┼─▶│   net   │──▶│  proxy   │──▶│ plugins (crunch)  │  │
//!                    │  │listener │   │  chat    │   └─────────┬─────────┘  │
//!                    │  └─────────┘   └────┬─────┘             │            │
//!                    │                     │     ┌─────────────▼─────────┐  │
//!                    │                     │     │ rewrite (client side) │  │
//!                    │                     │     └─────────────┬─────────┘  │
//!                    │                     │     ┌─────────────▼─────────┐  │
//!                    │                     │     │ routing (forward,     │  │
//!                    │                     │     │ actions) + pool       │  │
//!                    │                     │     └─────────────┬─────────┘  │
//!                    │                     │     ┌─────────────▼─────────┐  │    Destination,
//!                    │                     └────▶│ gateway (direct,      │──┼──▶ parent proxy
//!                    │                           │ parent, SOCKS)        │  │    or SOCKS
//!   Client Response  │  ┌──────────────────┐     └───────────────────────┘  │
//!   ◀────────────────┼──│ rewrite (server) │◀── relay loop, body filters     │
//!                    │  └──────────────────┘                                 │
//!                    │                                                       │
//!                    │  config (TOML, hot reload) · observability · lifecycle│
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use seeks_proxy::config::loader::load_config;
use seeks_proxy::config::watcher::ConfigWatcher;
use seeks_proxy::config::{ActiveConfig, ProxyConfig};
use seeks_proxy::observability::{logging, metrics};
use seeks_proxy::{PluginRegistry, ProxyServer, Shutdown};

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "seeks-proxy", version, about = "Intercepting HTTP proxy")]
struct Args {
    /// TOML configuration file. Watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address from the configuration.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
    }

    logging::init_tracing(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "seeks-proxy starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_client_connections = config.listener.max_client_connections,
        socket_timeout_secs = config.timeouts.socket_timeout_secs,
        keep_alive = config.features.keep_alive,
        connection_sharing = config.features.connection_sharing,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let server = ProxyServer::bind(ActiveConfig::compile(config)?, PluginRegistry::new(), shutdown.clone()).await?;
    let context = server.context();

    // Dropping the notify watcher stops it, so it lives until main returns.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            tokio::spawn(async move {
                while let Some(active) = updates.recv().await {
                    context.install(active);
                }
            });
            Some(handle)
        }
        None => None,
    };

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown.trigger(),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    server.run().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
