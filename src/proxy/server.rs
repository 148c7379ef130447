//! Accept loop and the state shared by every client connection.
//!
//! # Responsibilities
//! - Bind the listener and enforce the client connection limit
//! - Spawn one task per client connection, each with its own span
//! - Hand each connection a configuration snapshot
//! - Run the pool sweeper and stop everything on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::config::ActiveConfig;
use crate::http::response::TOO_MANY_CONNECTIONS_RESPONSE;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::plugins::PluginRegistry;
use crate::pool::ConnectionPool;
use crate::proxy::context::ClientState;
use crate::proxy::serve::{serve, Session};

/// How long shutdown waits for open client connections.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// State shared by all client connections.
#[derive(Debug)]
pub struct ProxyContext {
    config: ArcSwap<ActiveConfig>,
    pub pool: Arc<ConnectionPool>,
    pub plugins: PluginRegistry,
    pub tracker: ConnectionTracker,
}

impl ProxyContext {
    pub fn new(config: ActiveConfig, plugins: PluginRegistry) -> Self {
        let pool = Arc::new(ConnectionPool::new(config.config.limits.pool_capacity));
        Self {
            config: ArcSwap::from_pointee(config),
            pool,
            plugins,
            tracker: ConnectionTracker::new(),
        }
    }

    /// The configuration new connections start with.
    pub fn snapshot(&self) -> Arc<ActiveConfig> {
        self.config.load_full()
    }

    /// Install a new configuration. Open connections keep the snapshot
    /// they started with.
    pub fn install(&self, active: ActiveConfig) {
        tracing::info!("Configuration reloaded, new connections use it");
        self.config.store(Arc::new(active));
    }
}

/// The proxy: a listener plus the shared context.
#[derive(Debug)]
pub struct ProxyServer {
    listener: Listener,
    context: Arc<ProxyContext>,
    shutdown: Shutdown,
}

impl ProxyServer {
    pub async fn bind(config: ActiveConfig, plugins: PluginRegistry, shutdown: Shutdown) -> Result<Self, ListenerError> {
        let listener = Listener::bind(&config.config.listener).await?;
        Ok(Self {
            listener,
            context: Arc::new(ProxyContext::new(config, plugins)),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<ProxyContext> {
        Arc::clone(&self.context)
    }

    /// Accept connections until shutdown is triggered.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(
                address = %addr,
                max_connections = self.listener.max_connections(),
                "Proxy listening"
            );
        }

        let sweeper = self.context.pool.start_sweeper(&self.shutdown);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, Some(permit))) => self.spawn_connection(stream, peer, permit),
                    Ok((stream, peer, None)) => {
                        tracing::warn!(peer = %peer, "Maximum number of open connections reached");
                        tokio::spawn(refuse_connection(stream));
                    }
                    Err(e) => tracing::error!(error = %e, "Accept failed"),
                },
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        if !self.context.tracker.wait_for_drain(DRAIN_DEADLINE).await {
            tracing::warn!(
                active = self.context.tracker.active_count(),
                "Client connections still open at shutdown"
            );
        }
        self.context.pool.close_all();
        if let Err(e) = sweeper.await {
            tracing::debug!(error = %e, "Pool sweeper ended abnormally");
        }
        tracing::info!("Proxy stopped");
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let context = Arc::clone(&self.context);
        let guard = context.tracker.track();
        let span = tracing::info_span!("connection", connection_id = %guard.id(), peer = %peer);

        tokio::spawn(
            async move {
                tracing::debug!("Accepted connection");
                let state = ClientState::new(guard.id(), peer, context.snapshot());
                serve(Session::new(stream, state, Arc::clone(&context))).await;
                drop(permit);
                drop(guard);
            }
            .instrument(span),
        );
    }
}

async fn refuse_connection(mut stream: TcpStream) {
    if let Err(e) = stream.write_all(TOO_MANY_CONNECTIONS_RESPONSE.as_bytes()).await {
        tracing::debug!(error = %e, "Refusal not delivered");
    }
}
