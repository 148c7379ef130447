//! Per-connection state shared by the relay loop and the rewrite pipeline.
//!
//! Flags that the original bitmask packed together are grouped here by
//! concern: keep-alive negotiation, content classification and the
//! lifecycle of the current exchange.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::config::ActiveConfig;
use crate::http::headers::HeaderList;
use crate::http::iob::Iob;
use crate::http::request::HttpRequest;
use crate::net::connection::ConnectionId;
use crate::routing::actions::CurrentAction;
use crate::routing::forward::ForwardSpec;

/// Keep-alive negotiation for both sides of the exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveFlags {
    /// The client connection may carry another request.
    pub client: bool,
    /// The server connection may be reused.
    pub server: bool,
    /// The server advertised its keep-alive timeout.
    pub server_timeout_set: bool,
    /// The upstream socket saw something that rules out reuse.
    pub server_socket_tainted: bool,
}

/// Classification of the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentClass {
    /// Filterable text.
    pub text: bool,
    pub gif: bool,
    /// Must not be filtered.
    pub taboo: bool,
    /// `Content-Encoding: gzip`.
    pub gzip: bool,
    /// `Content-Encoding: deflate`.
    pub deflate: bool,
    /// A Content-Type header has been seen.
    pub declared: bool,
}

impl ContentClass {
    /// Everything cleared except the taboo marker.
    pub fn taboo() -> Self {
        Self {
            taboo: true,
            ..Self::default()
        }
    }
}

/// Per-exchange lifecycle flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeFlags {
    /// Request carried the force prefix and bypasses toggle-dependent crunchers.
    pub forced: bool,
    pub chunked: bool,
    /// The body has been rewritten; framing headers must follow suit.
    pub modified: bool,
    /// The expected content length is known.
    pub content_length_set: bool,
    /// The server sent a usable Content-Length.
    pub server_content_length_set: bool,
    pub client_request_completely_read: bool,
    pub client_header_parsing_done: bool,
    pub host_header_set: bool,
    pub client_connection_header_set: bool,
    pub server_connection_header_set: bool,
    pub server_proxy_connection_header_set: bool,
    pub x_forwarded_for_appended: bool,
    /// The client asked for an unfiltered response.
    pub no_filtering: bool,
}

/// Identity and timing of the upstream connection in use.
#[derive(Debug, Clone)]
pub struct ServerConnection {
    pub host: String,
    pub port: u16,
    pub forwarder: ForwardSpec,
    /// Seconds the upstream keeps an idle connection open.
    pub keep_alive_timeout: u64,
    pub request_sent: Option<Instant>,
    pub response_received: Option<Instant>,
    pub timestamp: Instant,
}

impl ServerConnection {
    pub fn new(keep_alive_timeout: u64) -> Self {
        Self {
            host: String::new(),
            port: 0,
            forwarder: ForwardSpec::default(),
            keep_alive_timeout,
            request_sent: None,
            response_received: None,
            timestamp: Instant::now(),
        }
    }

    /// Record the destination a freshly opened socket leads to.
    pub fn save_destination(&mut self, http: &HttpRequest, fwd: &ForwardSpec) {
        self.host = http.host.clone();
        self.port = http.port;
        self.forwarder = fwd.clone();
    }

    /// Whether this connection leads where `http` wants to go via `fwd`.
    pub fn destination_matches(&self, http: &HttpRequest, fwd: &ForwardSpec) -> bool {
        self.port == http.port
            && self.host.eq_ignore_ascii_case(&http.host)
            && self.forwarder.same_forwarder(fwd)
    }

    /// Round-trip time of the last exchange in whole seconds.
    pub fn latency_secs(&self) -> u64 {
        match (self.request_sent, self.response_received) {
            (Some(sent), Some(received)) => received.saturating_duration_since(sent).as_secs(),
            _ => 0,
        }
    }

    pub fn mark_closed(&mut self) {
        self.host.clear();
        self.port = 0;
        self.forwarder = ForwardSpec::default();
    }
}

/// State of one client connection across its keep-alive exchanges.
#[derive(Debug)]
pub struct ClientState {
    pub id: ConnectionId,
    /// Fresh for every exchange.
    pub request_id: Uuid,
    pub client_addr: SocketAddr,
    /// Client IP as text, used by X-Forwarded-For and log lines.
    pub ip_addr: String,
    pub config: Arc<ActiveConfig>,
    pub http: HttpRequest,
    pub headers: HeaderList,
    /// Bytes read but not yet processed.
    pub iob: Iob,
    pub action: CurrentAction,
    pub fwd: ForwardSpec,
    pub keep_alive: KeepAliveFlags,
    pub content: ContentClass,
    pub flags: ExchangeFlags,
    /// Filtering is switched on for this connection.
    pub toggled_on: bool,
    /// Some content filter will run over the body.
    pub content_filters_enabled: bool,
    /// Status code from the server's status line.
    pub status: u16,
    /// Body length as delivered.
    pub content_length: u64,
    /// Body length announced by the server or detected from framing.
    pub expected_content_length: u64,
    /// Diagnostic shown on error pages.
    pub error_message: Option<String>,
    pub server_connection: ServerConnection,
}

impl ClientState {
    pub fn new(id: ConnectionId, client_addr: SocketAddr, config: Arc<ActiveConfig>) -> Self {
        let limits = &config.config.limits;
        let iob = Iob::new(limits.buffer_limit);
        let keep_alive_timeout = config.config.timeouts.keep_alive_timeout_secs;
        let toggled_on = config.config.features.toggled_on;
        Self {
            id,
            request_id: Uuid::new_v4(),
            client_addr,
            ip_addr: client_addr.ip().to_string(),
            http: HttpRequest::default(),
            headers: HeaderList::new(),
            iob,
            action: CurrentAction::default(),
            fwd: ForwardSpec::default(),
            keep_alive: KeepAliveFlags::default(),
            content: ContentClass::default(),
            flags: ExchangeFlags::default(),
            toggled_on,
            content_filters_enabled: false,
            status: 0,
            content_length: 0,
            expected_content_length: 0,
            error_message: None,
            server_connection: ServerConnection::new(keep_alive_timeout),
            config,
        }
    }

    /// Forget everything about the previous exchange before reading the
    /// next request on a kept-alive client connection.
    pub fn reset_for_next_request(&mut self) {
        self.request_id = Uuid::new_v4();
        self.http = HttpRequest::default();
        self.headers.clear();
        self.iob.reset();
        self.action = CurrentAction::default();
        self.fwd = ForwardSpec::default();
        self.keep_alive = KeepAliveFlags::default();
        self.content = ContentClass::default();
        self.flags = ExchangeFlags::default();
        self.content_filters_enabled = false;
        self.status = 0;
        self.content_length = 0;
        self.expected_content_length = 0;
        self.error_message = None;
    }

    /// Mark the upstream socket unusable for further requests.
    pub fn mark_server_socket_tainted(&mut self) {
        if self.keep_alive.server {
            tracing::debug!(
                connection_id = %self.id,
                host = %self.server_connection.host,
                "Marking the server socket tainted"
            );
            self.keep_alive.server_socket_tainted = true;
        }
    }

    pub fn keep_alive_enabled(&self) -> bool {
        self.config.config.features.keep_alive
    }

    pub fn connection_sharing_enabled(&self) -> bool {
        self.config.config.features.connection_sharing
    }

    pub fn http_toggle_enabled(&self) -> bool {
        self.config.config.features.http_toggle
    }

    /// Keep-alive timeout from configuration, in seconds.
    pub fn configured_keep_alive_timeout(&self) -> u64 {
        self.config.config.timeouts.keep_alive_timeout_secs
    }

    /// Whether the response has been read completely for the bytes seen.
    pub fn server_response_is_complete(&mut self, byte_count: u64) -> bool {
        let mut length_known = self.flags.content_length_set;
        if self.http.is_head() || self.status == 304 {
            self.expected_content_length = 0;
            length_known = true;
        }
        length_known && (self.expected_content_length == 0 || self.expected_content_length <= byte_count)
    }
}
