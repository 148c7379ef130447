//! One request/response exchange between the client and its destination.
//!
//! # Data Flow
//! ```text
//! client socket
//!     → receive_client_request (request line, headers, destination, actions)
//!     → plugins.crunch? → canned response, done
//!     → parse_client_request (client header rewrite, keep-alive decision)
//!     → connect_upstream (same socket, pooled socket or new connect)
//!     → send_request (or CONNECT confirmation)
//!     → relay (select over both sockets until the response is complete)
//!     → access line
//! ```

use std::io;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::http::headers::{get_header, starts_with_ignore_case, HeaderList, LineRead};
use crate::http::request::{build_request_line, get_destination_from_headers, parse_http_request, unsupported_protocol};
use crate::http::response::{
    error_response, finish_http_response, ErrorPage, HttpResponse, CHEADER, CLIENT_CONNECTION_TIMEOUT_RESPONSE,
    CSUCCEED, FTP_RESPONSE, GOPHER_RESPONSE, INVALID_SERVER_HEADERS_RESPONSE, MESSED_UP_REQUEST_RESPONSE,
    MISSING_DESTINATION_RESPONSE, OUT_OF_MEMORY_RESPONSE,
};
use crate::gateway::forwarded_connect_with_retries;
use crate::net::socket::socket_is_still_usable;
use crate::observability::logging::log_clf;
use crate::observability::metrics::{self, Outcome};
use crate::plugins::{strip_force_prefix, PluginRegistry};
use crate::proxy::context::ClientState;
use crate::proxy::filter::filter_response_body;
use crate::proxy::serve::{Session, Upstream};
use crate::rewrite::{sed, update_server_headers, HeaderSide};
use crate::routing::actions::CurrentAction;
use crate::routing::forward::ForwardType;

const BUFFER_SIZE: usize = 8192;

/// Methods whose requests carry no body worth keeping around.
const BODYLESS_METHODS: [&str; 5] = ["GET", "HEAD", "TRACE", "OPTIONS", "DELETE"];

/// Result of topping up the client buffer.
#[derive(Debug, PartialEq, Eq)]
enum Fill {
    Data,
    Closed,
    TimedOut,
    Full,
}

/// Terminating zero-size chunk of a chunked body (without trailers).
const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Looks for [`LAST_CHUNK`] at the end of a chunked body that arrives in
/// arbitrary pieces. The tail of each piece is kept so a marker split
/// across reads is still seen.
#[derive(Debug, Default)]
struct LastChunkWatch {
    tail: Vec<u8>,
}

impl LastChunkWatch {
    fn saw_last_chunk(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }
        self.tail.extend_from_slice(data);
        let done = self.tail.ends_with(LAST_CHUNK);
        let stale = self.tail.len().saturating_sub(LAST_CHUNK.len() - 1);
        self.tail.drain(..stale);
        done
    }
}

/// Progress on the server response head.
#[derive(Debug, PartialEq, Eq)]
enum HeadRead {
    Complete,
    Incomplete,
    ClientGone,
}

/// What woke up the relay loop.
#[derive(Debug)]
enum Event {
    Client(io::Result<usize>),
    Server(io::Result<usize>),
    ServerDone,
}

/// Handle one request on `session.client`.
pub async fn chat(session: &mut Session) -> Outcome {
    if !receive_client_request(session).await {
        return Outcome::Error;
    }

    if let Some(rsp) = session.context.plugins.crunch(&session.state) {
        send_crunch_response(&mut session.client, &session.state, rsp).await;
        return Outcome::Crunched;
    }

    if !parse_client_request(session).await {
        return Outcome::Error;
    }

    let fwd = session.state.config.forward.forward_url(&session.state.http).clone();
    session.state.fwd = fwd;

    if !session.state.http.ssl {
        let line = build_request_line(&session.state.http, session.state.fwd.forward.is_some());
        session.state.headers.set_first(line);
    }

    if !connect_upstream(session).await {
        return Outcome::Error;
    }
    if !send_request(session).await {
        return Outcome::Error;
    }

    relay(session).await
}

/// Write a canned response and log it.
async fn send_canned(client: &mut TcpStream, state: &ClientState, text: &str, request: &str, status: u16) {
    log_clf(&state.ip_addr, request, status, 0);
    if let Err(e) = client.write_all(text.as_bytes()).await {
        tracing::debug!(connection_id = %state.id, error = %e, "Couldn't deliver the canned response");
    }
}

/// Finish `rsp`, deliver it to the client and log it.
pub(crate) async fn send_crunch_response(client: &mut TcpStream, state: &ClientState, mut rsp: HttpResponse) {
    finish_http_response(&mut rsp, &state.http);
    tracing::info!(
        connection_id = %state.id,
        request_id = %state.request_id,
        reason = rsp.reason.as_str(),
        url = %state.http.url,
        "Crunch"
    );
    log_clf(&state.ip_addr, &state.http.ocmd, rsp.status_code(), rsp.body.len() as u64);

    if let Err(e) = client.write_all(&rsp.to_bytes()).await {
        tracing::error!(connection_id = %state.id, error = %e, "Couldn't deliver the crunch response");
    }
}

/// Read more client bytes into the buffer within the socket timeout.
async fn fill_from_client(session: &mut Session) -> Fill {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let timeout = session.socket_timeout();
    match tokio::time::timeout(timeout, session.client.read(&mut buf)).await {
        Err(_) => Fill::TimedOut,
        Ok(Ok(0)) => Fill::Closed,
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %session.state.id, error = %e, "Read from client failed");
            Fill::Closed
        }
        Ok(Ok(n)) => match session.state.iob.append(&buf[..n]) {
            Ok(()) => Fill::Data,
            Err(e) => {
                tracing::error!(connection_id = %session.state.id, error = %e, "Client buffer overflow");
                Fill::Full
            }
        },
    }
}

async fn get_request_line(session: &mut Session) -> Option<String> {
    loop {
        match get_header(&mut session.state.iob) {
            LineRead::Line(line) => return Some(line),
            LineRead::EndOfHeaders => {
                tracing::debug!(connection_id = %session.state.id, "Empty line instead of a request line");
                return None;
            }
            LineRead::Incomplete => match fill_from_client(session).await {
                Fill::Data => {}
                Fill::TimedOut => {
                    tracing::error!(
                        connection_id = %session.state.id,
                        "Stopped waiting for the request line"
                    );
                    if let Err(e) = session
                        .client
                        .write_all(CLIENT_CONNECTION_TIMEOUT_RESPONSE.as_bytes())
                        .await
                    {
                        tracing::debug!(connection_id = %session.state.id, error = %e, "Timeout notice not delivered");
                    }
                    return None;
                }
                Fill::Closed | Fill::Full => return None,
            },
        }
    }
}

/// Read and parse the request head. Returns false when the exchange is
/// over, any response having been sent already.
async fn receive_client_request(session: &mut Session) -> bool {
    let Some(mut line) = get_request_line(session).await else {
        return false;
    };

    if let Some(protocol) = unsupported_protocol(&line) {
        tracing::error!(
            connection_id = %session.state.id,
            protocol,
            request = %line,
            "Request for a protocol this proxy doesn't speak"
        );
        let response = if protocol == "ftp" { FTP_RESPONSE } else { GOPHER_RESPONSE };
        send_canned(&mut session.client, &session.state, response, &line, 400).await;
        return false;
    }

    if strip_force_prefix(&mut line) {
        tracing::info!(connection_id = %session.state.id, request = %line, "Enforcing request");
        session.state.flags.forced = true;
    }

    match parse_http_request(&line) {
        Ok(http) => session.state.http = http,
        Err(e) => {
            tracing::error!(
                connection_id = %session.state.id,
                client = %session.state.ip_addr,
                error = %e,
                "Couldn't parse request line"
            );
            send_canned(&mut session.client, &session.state, CHEADER, "Invalid request", 400).await;
            return false;
        }
    }

    let mut received = HeaderList::new();
    loop {
        match get_header(&mut session.state.iob) {
            LineRead::Line(header) => received.enlist(header),
            LineRead::EndOfHeaders => break,
            LineRead::Incomplete => match fill_from_client(session).await {
                Fill::Data => {}
                Fill::TimedOut => {
                    tracing::error!(connection_id = %session.state.id, "Stopped grabbing the client headers");
                    return false;
                }
                Fill::Closed | Fill::Full => return false,
            },
        }
    }

    if !session.state.http.has_host() && !get_request_destination_elsewhere(session, &received).await {
        return false;
    }

    let state = &mut session.state;
    state.action = if state.toggled_on {
        state.config.actions.resolve(&state.http)
    } else {
        CurrentAction::default()
    };

    state.http.ocmd = state.http.cmd.clone();
    state.headers.enlist(state.http.cmd.clone());
    for header in received.iter() {
        if state.headers.iter().any(|existing| existing == header) {
            tracing::debug!(connection_id = %state.id, header, "Dropping duplicate header");
            continue;
        }
        state.headers.enlist(header);
    }
    true
}

/// Origin-form request: take the destination from the Host header if
/// intercepted requests are accepted.
async fn get_request_destination_elsewhere(session: &mut Session, received: &HeaderList) -> bool {
    if !session.state.config.config.features.accept_intercepted_requests {
        tracing::error!(
            connection_id = %session.state.id,
            client = %session.state.ip_addr,
            request = %session.state.http.cmd,
            "Request without destination while intercepted requests are off"
        );
        let request = session.state.http.cmd.clone();
        send_canned(&mut session.client, &session.state, CHEADER, &request, 400).await;
        return false;
    }

    if let Err(e) = get_destination_from_headers(received, &mut session.state.http) {
        tracing::error!(connection_id = %session.state.id, error = %e, "No destination in the request headers");
        let request = session.state.http.cmd.clone();
        send_canned(
            &mut session.client,
            &session.state,
            MISSING_DESTINATION_RESPONSE,
            &request,
            400,
        )
        .await;
        return false;
    }
    true
}

/// Rewrite the client headers and settle keep-alive for this request.
async fn parse_client_request(session: &mut Session) -> bool {
    let state = &mut session.state;

    if state.keep_alive_enabled() && state.http.is_http11() && !state.http.ssl {
        state.keep_alive.client = true;
    }
    state.content_filters_enabled = state.toggled_on && !state.action.filters().is_empty();

    let rewrite = sed(state, HeaderSide::Client);
    state.flags.client_header_parsing_done = true;
    let rewritten_ok = match rewrite {
        Ok(()) => check_request_line(state),
        Err(e) => {
            tracing::error!(connection_id = %state.id, error = %e, "Failed to rewrite the client headers");
            false
        }
    };
    if !rewritten_ok {
        let request = state.http.ocmd.clone();
        tracing::error!(connection_id = %state.id, request = %request, "Invalid request generated");
        send_canned(
            &mut session.client,
            &session.state,
            MESSED_UP_REQUEST_RESPONSE,
            "Invalid request generated",
            400,
        )
        .await;
        return false;
    }

    let state = &mut session.state;
    if state.keep_alive.client {
        if state.iob.is_empty() {
            state.flags.client_request_completely_read = true;
        } else {
            // Leftover bytes: a request body or a pipelined request.
            state.keep_alive.server_socket_tainted = true;
            if BODYLESS_METHODS.iter().any(|m| state.http.is_method(m)) {
                tracing::info!(
                    connection_id = %state.id,
                    bytes = state.iob.len(),
                    "Dropping pipelined client data"
                );
                state.iob.reset();
                state.flags.client_request_completely_read = true;
            } else {
                state.flags.client_request_completely_read = false;
            }
        }
    }
    true
}

/// A header rule may have replaced the request line; re-parse it if so.
fn check_request_line(state: &mut ClientState) -> bool {
    let Some(first) = state.headers.first() else {
        return false;
    };
    if first == state.http.cmd {
        return true;
    }

    match parse_http_request(first) {
        Ok(mut http) => {
            tracing::info!(
                connection_id = %state.id,
                from = %state.http.cmd,
                to = %http.cmd,
                "Rewrite detected"
            );
            http.ocmd = std::mem::take(&mut state.http.ocmd);
            state.http = http;
            true
        }
        Err(_) => false,
    }
}

/// Settle on an upstream socket: the one already open, one from the pool
/// or a fresh connect.
async fn connect_upstream(session: &mut Session) -> bool {
    let fwd = session.state.fwd.clone();

    if let Some(upstream) = session.upstream.as_ref() {
        if socket_is_still_usable(&upstream.stream)
            && session.state.server_connection.destination_matches(&session.state.http, &fwd)
        {
            tracing::debug!(
                connection_id = %session.state.id,
                host = %session.state.server_connection.host,
                "Reusing server socket"
            );
            return true;
        }
        tracing::debug!(
            connection_id = %session.state.id,
            host = %session.state.server_connection.host,
            "Closing server socket before switching destination"
        );
        session.drop_upstream();
    }

    let keep_alive_timeout = session.state.configured_keep_alive_timeout();
    if session.state.connection_sharing_enabled() && !session.state.keep_alive.server_socket_tainted {
        if let Some((stream, ticket)) = session.context.pool.get_reusable(&session.state.http, &fwd) {
            session.state.server_connection.save_destination(&session.state.http, &fwd);
            session.state.server_connection.keep_alive_timeout = keep_alive_timeout;
            session.upstream = Some(Upstream {
                stream,
                ticket: Some(ticket),
            });
            return true;
        }
    }

    let timeout = session.connect_timeout();
    let retries = session.state.config.config.limits.forwarded_connect_retries;
    match forwarded_connect_with_retries(&fwd, &session.state.http, timeout, retries).await {
        Ok(stream) => {
            session.state.server_connection.save_destination(&session.state.http, &fwd);
            session.state.server_connection.keep_alive_timeout = keep_alive_timeout;
            session.upstream = Some(Upstream { stream, ticket: None });
            true
        }
        Err(e) => {
            let page = if fwd.forward_type != ForwardType::None {
                ErrorPage::ForwardingFailed
            } else if e.is_resolve_failure() {
                ErrorPage::NoSuchDomain
            } else {
                ErrorPage::ConnectFailed
            };
            tracing::info!(
                connection_id = %session.state.id,
                hostport = %session.state.http.hostport,
                error = %e,
                "Connect failed"
            );
            session.state.error_message = Some(e.to_string());
            let rsp = error_response(page, &session.state.http, session.state.error_message.as_deref());
            send_crunch_response(&mut session.client, &session.state, rsp).await;
            false
        }
    }
}

/// Send the rewritten head and any buffered body upstream, or confirm a
/// CONNECT to the client.
async fn send_request(session: &mut Session) -> bool {
    let Session {
        client,
        upstream,
        state,
        ..
    } = session;
    let Some(upstream) = upstream.as_mut() else {
        return false;
    };

    if state.fwd.forward.is_some() || !state.http.ssl {
        let head = state.headers.to_text();
        state.headers.clear();
        let body = state.iob.drain();

        let sent = async {
            upstream.stream.write_all(head.as_bytes()).await?;
            if !body.is_empty() {
                upstream.stream.write_all(&body).await?;
            }
            Ok::<_, io::Error>(())
        }
        .await;

        if let Err(e) = sent {
            tracing::info!(
                connection_id = %state.id,
                hostport = %state.http.hostport,
                error = %e,
                "Writing the request head upstream failed"
            );
            state.error_message = Some(e.to_string());
            let rsp = error_response(ErrorPage::ConnectFailed, &state.http, state.error_message.as_deref());
            send_crunch_response(client, state, rsp).await;
            return false;
        }
    } else {
        state.headers.clear();
        if let Err(e) = client.write_all(CSUCCEED.as_bytes()).await {
            tracing::debug!(connection_id = %state.id, error = %e, "CONNECT confirmation not delivered");
            return false;
        }
        state.iob.reset();
    }

    state.server_connection.request_sent = Some(Instant::now());
    true
}

/// Parse server header lines out of the buffer, relaying interim
/// `100 Continue` heads to HTTP/1.1 clients.
async fn read_server_head(client: &mut TcpStream, state: &mut ClientState) -> HeadRead {
    loop {
        match get_header(&mut state.iob) {
            LineRead::Line(line) => state.headers.enlist(line),
            LineRead::Incomplete => return HeadRead::Incomplete,
            LineRead::EndOfHeaders => {
                let interim = state
                    .headers
                    .first()
                    .is_some_and(|line| starts_with_ignore_case(line, "HTTP/1.1 100"));
                if !interim {
                    return HeadRead::Complete;
                }
                tracing::debug!(connection_id = %state.id, "Interim 100 Continue response");
                if state.http.is_http11() {
                    let head = state.headers.to_text();
                    if let Err(e) = client.write_all(head.as_bytes()).await {
                        tracing::debug!(connection_id = %state.id, error = %e, "Interim response not delivered");
                        return HeadRead::ClientGone;
                    }
                }
                state.headers.clear();
            }
        }
    }
}

/// Deliver the buffered, now complete, body after filtering it.
async fn deliver_filtered(client: &mut TcpStream, state: &mut ClientState, plugins: &PluginRegistry) -> io::Result<()> {
    let filtered = filter_response_body(state, plugins);
    if filtered.is_none() {
        state.content_length = state.iob.len() as u64;
    }
    if let Err(e) = update_server_headers(state) {
        tracing::warn!(connection_id = %state.id, error = %e, "Failed to update the server headers");
    }

    let head = state.headers.to_text();
    client.write_all(head.as_bytes()).await?;
    match filtered {
        Some(body) => client.write_all(&body).await?,
        None => {
            let raw = state.iob.drain();
            client.write_all(&raw).await?;
        }
    }
    Ok(())
}

/// Copy data both ways until the response is complete or a side closes.
async fn relay(session: &mut Session) -> Outcome {
    let timeout = session.socket_timeout();
    let Session {
        client,
        upstream,
        state,
        context,
    } = session;
    let Some(upstream) = upstream.as_mut() else {
        return Outcome::Error;
    };

    let ssl = state.http.ssl;
    let via_parent = state.fwd.forward.is_some();
    let mut client_buf = vec![0u8; BUFFER_SIZE];
    let mut server_buf = vec![0u8; BUFFER_SIZE];
    let mut byte_count: u64 = 0;
    let mut server_body = false;
    let mut server_eof = false;
    let mut content_filter = false;
    let mut iis5_hack = false;
    let mut response_started = false;
    let mut last_chunk = LastChunkWatch::default();

    let outcome = loop {
        let event = if server_body && (server_eof || state.server_response_is_complete(byte_count)) {
            Event::ServerDone
        } else {
            let read_client = !state.flags.client_request_completely_read;
            let woke = tokio::time::timeout(timeout, async {
                tokio::select! {
                    r = client.read(&mut client_buf), if read_client => Event::Client(r),
                    r = upstream.stream.read(&mut server_buf) => Event::Server(r),
                }
            })
            .await;

            match woke {
                Ok(event) => event,
                Err(_) => {
                    tracing::error!(connection_id = %state.id, url = %state.http.url, "Didn't receive data in time");
                    if !response_started && !ssl {
                        let rsp = error_response(ErrorPage::ConnectionTimeout, &state.http, None);
                        send_crunch_response(client, state, rsp).await;
                    }
                    state.mark_server_socket_tainted();
                    return Outcome::Error;
                }
            }
        };

        let len = match event {
            Event::Client(Ok(0)) | Event::Client(Err(_)) => {
                tracing::debug!(connection_id = %state.id, "The client closed its side of the connection");
                state.mark_server_socket_tainted();
                break if ssl { Outcome::Tunneled } else { Outcome::Forwarded };
            }
            Event::Client(Ok(n)) => {
                if let Err(e) = upstream.stream.write_all(&client_buf[..n]).await {
                    tracing::error!(connection_id = %state.id, host = %state.http.host, error = %e, "Write to server failed");
                    state.mark_server_socket_tainted();
                    return Outcome::Error;
                }
                continue;
            }
            Event::ServerDone => 0,
            Event::Server(result) => {
                if !socket_is_still_usable(client) {
                    tracing::info!(
                        connection_id = %state.id,
                        "The server still wants to talk, but the client hung up on us"
                    );
                    state.mark_server_socket_tainted();
                    return Outcome::Error;
                }
                match result {
                    Ok(n) => {
                        if n == 0 {
                            server_eof = true;
                        }
                        n
                    }
                    Err(e) => {
                        tracing::error!(connection_id = %state.id, host = %state.http.host, error = %e, "Read from server failed");
                        if ssl && !via_parent {
                            return Outcome::Error;
                        }
                        if response_started {
                            state.mark_server_socket_tainted();
                            return Outcome::Error;
                        }
                        state.mark_server_socket_tainted();
                        server_eof = true;
                        0
                    }
                }
            }
        };

        let mut chunk: &[u8] = &server_buf[..len];

        if len == 0 {
            if server_body || ssl {
                if content_filter {
                    if let Err(e) = deliver_filtered(client, state, &context.plugins).await {
                        tracing::error!(connection_id = %state.id, error = %e, "Write modified content to client failed");
                        state.mark_server_socket_tainted();
                        return Outcome::Error;
                    }
                }
                break if ssl { Outcome::Tunneled } else { Outcome::Forwarded };
            }
            // The server closed before finishing its head. Terminate the
            // head ourselves and see whether it parses.
            chunk = b"\r\n";
            iis5_hack = true;
        }

        if server_body || ssl {
            let body_ends = state.flags.chunked && last_chunk.saw_last_chunk(chunk);
            if content_filter {
                if let Err(e) = state.iob.append(chunk) {
                    tracing::info!(
                        connection_id = %state.id,
                        error = %e,
                        "Flushing header and buffers, stepping back from filtering"
                    );
                    let head = state.headers.to_text();
                    let buffered = state.iob.drain();
                    let flushed = async {
                        client.write_all(head.as_bytes()).await?;
                        client.write_all(&buffered).await?;
                        client.write_all(chunk).await
                    }
                    .await;
                    if let Err(e) = flushed {
                        tracing::error!(connection_id = %state.id, error = %e, "Flush to client failed");
                        state.mark_server_socket_tainted();
                        return Outcome::Error;
                    }
                    response_started = true;
                    byte_count = buffered.len() as u64;
                    content_filter = false;
                }
            } else {
                tracing::trace!(connection_id = %state.id, bytes = chunk.len(), "Relaying server data");
                if let Err(e) = client.write_all(chunk).await {
                    tracing::error!(connection_id = %state.id, error = %e, "Write to client failed");
                    state.mark_server_socket_tainted();
                    return Outcome::Error;
                }
                response_started = true;
            }
            byte_count += chunk.len() as u64;
            if body_ends {
                tracing::debug!(connection_id = %state.id, "Reached the end of the last chunk");
                state.expected_content_length = byte_count;
                state.flags.content_length_set = true;
            }
            continue;
        }

        // Still reading the response head.
        if let Err(e) = state.iob.append(chunk) {
            tracing::error!(connection_id = %state.id, error = %e, "Out of memory while looking for end of server headers");
            log_clf(&state.ip_addr, &state.http.ocmd, 500, 0);
            if let Err(e) = client.write_all(OUT_OF_MEMORY_RESPONSE.as_bytes()).await {
                tracing::debug!(connection_id = %state.id, error = %e, "Out-of-memory notice not delivered");
            }
            state.mark_server_socket_tainted();
            return Outcome::Error;
        }

        match read_server_head(client, state).await {
            HeadRead::Complete => {}
            HeadRead::ClientGone => {
                state.mark_server_socket_tainted();
                return Outcome::Error;
            }
            HeadRead::Incomplete => {
                if iis5_hack {
                    tracing::error!(
                        connection_id = %state.id,
                        url = %state.http.url,
                        "Invalid server headers, terminating them didn't help"
                    );
                    send_canned(client, state, INVALID_SERVER_HEADERS_RESPONSE, &state.http.ocmd, 502).await;
                    state.mark_server_socket_tainted();
                    return Outcome::Error;
                }
                tracing::debug!(connection_id = %state.id, "Continuing to buffer the server headers");
                continue;
            }
        }

        let Some(first) = state.headers.first() else {
            tracing::error!(connection_id = %state.id, url = %state.http.url, "Empty server or forwarder response");
            let rsp = error_response(ErrorPage::NoServerData, &state.http, None);
            send_crunch_response(client, state, rsp).await;
            state.mark_server_socket_tainted();
            return Outcome::Error;
        };
        if !starts_with_ignore_case(first, "HTTP") && !starts_with_ignore_case(first, "ICY") {
            let shown: String = first.chars().take(30).collect();
            tracing::error!(
                connection_id = %state.id,
                url = %state.http.url,
                starts_with = %shown,
                "Invalid server or forwarder response"
            );
            send_canned(client, state, INVALID_SERVER_HEADERS_RESPONSE, &state.http.ocmd, 502).await;
            state.mark_server_socket_tainted();
            return Outcome::Error;
        }

        if let Err(e) = sed(state, HeaderSide::Server) {
            tracing::error!(connection_id = %state.id, error = %e, "Failed to rewrite the server headers");
            send_canned(client, state, INVALID_SERVER_HEADERS_RESPONSE, &state.http.ocmd, 502).await;
            state.mark_server_socket_tainted();
            return Outcome::Error;
        }
        state.server_connection.response_received = Some(Instant::now());

        if !ssl {
            content_filter = !state.content.taboo
                && (state.content.text || state.action.force_text_mode())
                && !state.flags.no_filtering
                && context.plugins.any_filter_active(state);
        }

        // The whole body may have come in with the head.
        let body_ends = state.flags.chunked && last_chunk.saw_last_chunk(state.iob.unconsumed());

        if content_filter {
            byte_count += state.iob.len() as u64;
        } else {
            let head = state.headers.to_text();
            let buffered = state.iob.drain();
            let sent = async {
                client.write_all(head.as_bytes()).await?;
                client.write_all(&buffered).await
            }
            .await;
            if let Err(e) = sent {
                tracing::error!(connection_id = %state.id, error = %e, "Write header to client failed");
                state.mark_server_socket_tainted();
                return Outcome::Error;
            }
            response_started = true;
            byte_count += buffered.len() as u64;
        }
        if body_ends {
            tracing::debug!(connection_id = %state.id, "Chunked body arrived with the head");
            state.expected_content_length = byte_count;
            state.flags.content_length_set = true;
        }
        server_body = true;
    };

    if state.content_length == 0 {
        state.content_length = byte_count;
    }
    if state.flags.content_length_set && state.expected_content_length != byte_count {
        tracing::debug!(
            connection_id = %state.id,
            received = byte_count,
            expected = state.expected_content_length,
            "Response length differs from the announced one"
        );
        state.mark_server_socket_tainted();
    }

    let status = if state.status == 0 { 200 } else { state.status };
    log_clf(&state.ip_addr, &state.http.ocmd, status, state.content_length);
    metrics::record_bytes_relayed(byte_count);
    state.server_connection.timestamp = Instant::now();
    outcome
}
