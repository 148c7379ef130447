//! One client connection: request after request until someone hangs up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::net::socket::{data_is_available, socket_is_still_usable};
use crate::observability::metrics;
use crate::pool::PoolTicket;
use crate::proxy::chat::chat;
use crate::proxy::context::ClientState;
use crate::proxy::server::ProxyContext;

/// Socket to the destination, a parent proxy or a SOCKS gateway.
#[derive(Debug)]
pub struct Upstream {
    pub stream: TcpStream,
    /// Set when the socket was checked out of the shared pool.
    pub ticket: Option<PoolTicket>,
}

/// Everything one client connection owns.
#[derive(Debug)]
pub struct Session {
    pub client: TcpStream,
    pub upstream: Option<Upstream>,
    pub state: ClientState,
    pub context: Arc<ProxyContext>,
}

impl Session {
    pub fn new(client: TcpStream, state: ClientState, context: Arc<ProxyContext>) -> Self {
        Self {
            client,
            upstream: None,
            state,
            context,
        }
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.state.config.config.timeouts.socket_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.state.config.config.timeouts.connect_timeout_secs)
    }

    /// Close the upstream socket, releasing its pool slot.
    pub fn drop_upstream(&mut self) {
        if let Some(upstream) = self.upstream.take() {
            if let Some(ticket) = upstream.ticket {
                self.context.pool.forget(ticket);
            }
            self.state.server_connection.mark_closed();
        }
    }

    /// Give the upstream socket back to the pool for other clients.
    fn hand_upstream_to_pool(&mut self) {
        let Some(upstream) = self.upstream.take() else {
            return;
        };
        let connection = &self.state.server_connection;
        match upstream.ticket {
            Some(ticket) => self.context.pool.mark_unused(ticket, upstream.stream, connection),
            None => self.context.pool.remember(upstream.stream, connection),
        }
        self.state.server_connection.mark_closed();
    }

    fn upstream_is_usable(&self) -> bool {
        self.upstream
            .as_ref()
            .is_some_and(|upstream| socket_is_still_usable(&upstream.stream))
    }
}

/// Serve requests on `session.client` until either side stops keeping
/// the connection alive.
pub async fn serve(mut session: Session) {
    loop {
        let started = Instant::now();
        let outcome = chat(&mut session).await;
        metrics::record_request(outcome, started);

        let state = &mut session.state;
        if state.keep_alive.server && !state.keep_alive.server_timeout_set {
            // No Keep-Alive header from the server: assume it times out
            // quickly.
            state.server_connection.keep_alive_timeout = 1;
        }

        let latency = state.server_connection.latency_secs();
        let keep_alive_timeout = state.server_connection.keep_alive_timeout;
        let continue_chatting = state.keep_alive_enabled()
            && state.keep_alive.server
            && !state.keep_alive.server_socket_tainted
            && session.upstream_is_usable()
            && latency < keep_alive_timeout;

        if !continue_chatting {
            if session.upstream.is_some() {
                tracing::debug!(
                    connection_id = %session.state.id,
                    host = %session.state.server_connection.host,
                    "The server connection isn't reusable"
                );
            }
            break;
        }

        let client_wait = Duration::from_secs(keep_alive_timeout - latency);
        if session.state.keep_alive.client
            && data_is_available(&session.client, client_wait).await
            && socket_is_still_usable(&session.client)
        {
            tracing::debug!(
                connection_id = %session.state.id,
                host = %session.state.server_connection.host,
                "Client request arrived in time on the kept-alive connection"
            );
            session.state.reset_for_next_request();
            continue;
        }

        if session.state.connection_sharing_enabled() && session.upstream_is_usable() {
            tracing::debug!(
                connection_id = %session.state.id,
                host = %session.state.server_connection.host,
                port = session.state.server_connection.port,
                "Remembering the server connection for other clients"
            );
            session.hand_upstream_to_pool();
        }
        break;
    }

    session.drop_upstream();
    tracing::debug!(connection_id = %session.state.id, "Closing client connection");
}
