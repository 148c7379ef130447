//! Upstream connection reuse pool.
//!
//! # Responsibilities
//! - Keep idle upstream sockets for later exchanges with the same destination
//! - Hand each socket to at most one exchange at a time
//! - Evict sockets whose keep-alive window has passed or whose peer hung up
//!
//! # Design Decisions
//! - Fixed capacity: when every slot is taken the new socket is closed
//! - One `std::sync::Mutex` over all slots, never held across an `.await`
//! - A checked-out socket leaves the pool; its slot stays claimed until
//!   the exchange hands it back or forgets it

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::http::request::HttpRequest;
use crate::lifecycle::Shutdown;
use crate::net::socket::socket_is_still_usable;
use crate::observability::metrics;
use crate::proxy::context::ServerConnection;
use crate::routing::forward::ForwardSpec;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Claim on a pool slot held by the exchange using its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTicket(usize);

#[derive(Debug)]
struct Slot {
    /// `None` while the slot is empty or its socket is checked out.
    stream: Option<TcpStream>,
    in_use: bool,
    /// Last activity, or when the socket was handed back.
    timestamp: Instant,
    request_sent: Option<Instant>,
    response_received: Option<Instant>,
    keep_alive_timeout: u64,
    host: String,
    port: u16,
    forwarder: ForwardSpec,
}

impl Slot {
    fn empty() -> Self {
        Self {
            stream: None,
            in_use: false,
            timestamp: Instant::now(),
            request_sent: None,
            response_received: None,
            keep_alive_timeout: 0,
            host: String::new(),
            port: 0,
            forwarder: ForwardSpec::default(),
        }
    }

    fn is_empty(&self) -> bool {
        self.stream.is_none() && !self.in_use
    }

    fn fill_from(&mut self, connection: &ServerConnection) {
        self.timestamp = connection.timestamp;
        self.request_sent = connection.request_sent;
        self.response_received = connection.response_received;
        self.keep_alive_timeout = connection.keep_alive_timeout;
        self.host = connection.host.clone();
        self.port = connection.port;
        self.forwarder = connection.forwarder.clone();
    }

    fn latency_secs(&self) -> u64 {
        match (self.request_sent, self.response_received) {
            (Some(sent), Some(received)) => received.saturating_duration_since(sent).as_secs(),
            _ => 0,
        }
    }

    fn has_expired(&self, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.timestamp).as_secs();
        self.keep_alive_timeout < idle + self.latency_secs()
    }

    fn matches(&self, http: &HttpRequest, fwd: &ForwardSpec) -> bool {
        self.port == http.port && self.host.eq_ignore_ascii_case(&http.host) && self.forwarder.same_forwarder(fwd)
    }
}

/// Process-wide pool of idle upstream connections.
#[derive(Debug)]
pub struct ConnectionPool {
    slots: Mutex<Vec<Slot>>,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(|_| Slot::empty()).collect()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        // A panic elsewhere cannot leave a slot half-written, so the data
        // is still consistent.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    /// Sockets waiting in the pool, not counting checked-out ones.
    pub fn idle_count(&self) -> usize {
        self.lock().iter().filter(|slot| slot.stream.is_some()).count()
    }

    /// Keep `stream` for reuse. Closes it when every slot is taken.
    pub fn remember(&self, stream: TcpStream, connection: &ServerConnection) {
        let mut slots = self.lock();
        match slots.iter_mut().find(|slot| slot.is_empty()) {
            Some(slot) => {
                slot.fill_from(connection);
                slot.stream = Some(stream);
                tracing::debug!(
                    host = %connection.host,
                    port = connection.port,
                    keep_alive_timeout = connection.keep_alive_timeout,
                    "Remembering server connection"
                );
            }
            None => {
                tracing::info!(
                    host = %connection.host,
                    port = connection.port,
                    "No free slot to remember the server connection, closing it"
                );
            }
        }
    }

    /// Check out an idle socket leading to the destination of `http`
    /// through `fwd`. Expired and dead sockets are closed first.
    pub fn get_reusable(&self, http: &HttpRequest, fwd: &ForwardSpec) -> Option<(TcpStream, PoolTicket)> {
        let mut slots = self.lock();
        Self::sweep_slots(&mut slots);

        let (index, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.in_use && slot.stream.is_some() && slot.matches(http, fwd))?;
        let stream = slot.stream.take()?;
        slot.in_use = true;

        tracing::debug!(host = %http.host, port = http.port, slot = index, "Found reusable server connection");
        metrics::record_pool_reuse();
        Some((stream, PoolTicket(index)))
    }

    /// Hand a checked-out socket back once its exchange is complete.
    pub fn mark_unused(&self, ticket: PoolTicket, stream: TcpStream, connection: &ServerConnection) {
        let mut slots = self.lock();
        match slots.get_mut(ticket.0) {
            Some(slot) if slot.in_use => {
                slot.fill_from(connection);
                slot.timestamp = Instant::now();
                slot.stream = Some(stream);
                slot.in_use = false;
            }
            _ => tracing::warn!(slot = ticket.0, "Returned connection has no claimed slot, closing it"),
        }
    }

    /// Release the slot of a checked-out socket that will not come back.
    pub fn forget(&self, ticket: PoolTicket) {
        let mut slots = self.lock();
        match slots.get_mut(ticket.0) {
            Some(slot) if !slot.is_empty() => {
                tracing::debug!(slot = ticket.0, host = %slot.host, "Forgetting server connection");
                *slot = Slot::empty();
            }
            _ => tracing::debug!(slot = ticket.0, "Connection already forgotten"),
        }
    }

    /// Close idle sockets that expired or whose peer went away.
    /// Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        Self::sweep_slots(&mut self.lock())
    }

    fn sweep_slots(slots: &mut [Slot]) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        for (index, slot) in slots.iter_mut().enumerate() {
            let Some(stream) = slot.stream.as_ref() else {
                continue;
            };
            let reason = if slot.has_expired(now) {
                "keep-alive timeout reached"
            } else if !socket_is_still_usable(stream) {
                "socket no longer usable"
            } else {
                continue;
            };
            tracing::debug!(slot = index, host = %slot.host, port = slot.port, reason, "Closing server connection");
            *slot = Slot::empty();
            metrics::record_pool_eviction();
            evicted += 1;
        }
        evicted
    }

    /// Sweep once a second while idle sockets are held, until shutdown.
    pub fn start_sweeper(self: &Arc<Self>, shutdown: &Shutdown) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if pool.idle_count() > 0 {
                            pool.sweep();
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Pool sweeper stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Close every idle socket.
    pub fn close_all(&self) {
        let mut slots = self.lock();
        for slot in slots.iter_mut().filter(|slot| slot.stream.is_some()) {
            *slot = Slot::empty();
        }
    }
}
