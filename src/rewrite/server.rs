//! Server response header handlers and adders.

use chrono::Utc;

use crate::error::ProxyResult;
use crate::http::dates::{format_header_time, http_time, parse_header_time, randomize};
use crate::http::headers::{contains_ignore_case, starts_with_ignore_case};
use crate::proxy::context::{ClientState, ContentClass};
use crate::rewrite::pipeline::HeaderOutcome;

use super::{header_value, leading_int};

pub fn server_http(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    state.status = header
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);

    if state.status == 206 {
        state.content = ContentClass::taboo();
    }

    if state.action.downgrade_http_version() && header.len() > 8 && starts_with_ignore_case(header, "HTTP/1.1") {
        let downgraded = format!("HTTP/1.0{}", &header[8..]);
        tracing::debug!(connection_id = %state.id, header = %downgraded, "Downgraded answer to HTTP/1.0");
        return Ok(HeaderOutcome::Replaced(downgraded));
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn server_set_cookie(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.action.crunch_incoming_cookies() {
        tracing::debug!(connection_id = %state.id, header = %header, "Crunching incoming cookie");
        return Ok(HeaderOutcome::Deleted);
    }
    if !state.action.session_cookies_only() {
        return Ok(HeaderOutcome::Unchanged);
    }

    let now = Utc::now();
    let mut changed = false;
    let kept: Vec<&str> = header
        .split("; ")
        .filter(|tag| {
            if !starts_with_ignore_case(tag, "expires=") {
                return true;
            }
            let date = &tag["expires=".len()..];
            if date.is_empty() {
                return true;
            }
            match parse_header_time(date) {
                // Already expired: the server is deleting the cookie.
                Some(expires) if expires < now => true,
                Some(_) => {
                    changed = true;
                    false
                }
                None => {
                    tracing::debug!(tag = %tag, "Can't parse cookie expiry date, removing it");
                    changed = true;
                    false
                }
            }
        })
        .collect();

    if !changed {
        return Ok(HeaderOutcome::Unchanged);
    }
    let rewritten = kept.join("; ");
    tracing::debug!(connection_id = %state.id, header = %rewritten, "Cookie rewritten to a temporary one");
    Ok(HeaderOutcome::Replaced(rewritten))
}

pub fn server_connection(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    state.flags.server_connection_header_set = true;

    if !header.eq_ignore_ascii_case("Connection: keep-alive") || state.keep_alive.server_socket_tainted {
        return Ok(HeaderOutcome::Unchanged);
    }

    if state.keep_alive_enabled() {
        state.keep_alive.server = true;
    }
    if state.keep_alive.client {
        tracing::debug!(connection_id = %state.id, header = %header, "Keeping the server header");
        return Ok(HeaderOutcome::Unchanged);
    }
    Ok(HeaderOutcome::Replaced("Connection: close".into()))
}

pub fn server_content_type(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.content.declared {
        tracing::warn!(connection_id = %state.id, header = %header, "Multiple Content-Type headers. Removing and ignoring");
        return Ok(HeaderOutcome::Deleted);
    }
    state.content.declared = true;

    if !state.content.taboo {
        if (contains_ignore_case(header, "text/") && !contains_ignore_case(header, "plain"))
            || contains_ignore_case(header, "xml")
            || contains_ignore_case(header, "application/x-javascript")
        {
            state.content.text = true;
        } else if contains_ignore_case(header, "image/gif") {
            state.content.gif = true;
        }
    }

    if let Some(overwrite) = state.action.content_type_overwrite() {
        if state.content.text || state.action.force_text_mode() {
            let rewritten = format!("Content-Type: {overwrite}");
            tracing::debug!(connection_id = %state.id, header = %rewritten, "Content-Type overwritten");
            return Ok(HeaderOutcome::Replaced(rewritten));
        }
        tracing::debug!(
            connection_id = %state.id,
            header = %header,
            "Content-Type not overwritten for non-text content; enable force-text-mode to override"
        );
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn server_content_md5(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.flags.modified {
        tracing::debug!(connection_id = %state.id, header = %header, "Body modified, crunching Content-MD5");
        return Ok(HeaderOutcome::Deleted);
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn server_content_encoding(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.flags.modified && (state.content.gzip || state.content.deflate) {
        // The body went out decompressed.
        tracing::debug!(connection_id = %state.id, header = %header, "Crunching Content-Encoding of decompressed body");
        return Ok(HeaderOutcome::Deleted);
    }

    if contains_ignore_case(header, "gzip") {
        state.content.gzip = true;
    } else if contains_ignore_case(header, "deflate") {
        state.content.deflate = true;
    } else if contains_ignore_case(header, "compress") {
        state.content = ContentClass::taboo();
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn server_save_content_length(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    match header_value(header).trim_end().parse::<u64>() {
        Ok(length) => {
            state.expected_content_length = length;
            state.flags.server_content_length_set = true;
            state.flags.content_length_set = true;
            Ok(HeaderOutcome::Unchanged)
        }
        Err(_) => {
            tracing::warn!(connection_id = %state.id, header = %header, "Crunching invalid Content-Length");
            Ok(HeaderOutcome::Deleted)
        }
    }
}

pub fn server_adjust_content_length(state: &mut ClientState, _header: &str) -> ProxyResult<HeaderOutcome> {
    if state.flags.modified {
        let header = format!("Content-Length: {}", state.content_length);
        tracing::debug!(connection_id = %state.id, header = %header, "Adjusted Content-Length");
        return Ok(HeaderOutcome::Replaced(header));
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn server_keep_alive(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    let Some(at) = header.to_ascii_lowercase().find("timeout=") else {
        return Ok(HeaderOutcome::Unchanged);
    };

    match leading_int(&header[at + "timeout=".len()..]).filter(|t| *t >= 0) {
        Some(timeout) => {
            let timeout = timeout as u64;
            if timeout < state.server_connection.keep_alive_timeout {
                tracing::debug!(connection_id = %state.id, timeout, "Reducing keep-alive timeout to the server's");
                state.server_connection.keep_alive_timeout = timeout;
            }
            state.keep_alive.server_timeout_set = true;
        }
        None => {
            tracing::debug!(connection_id = %state.id, header = %header, "Couldn't parse server keep-alive timeout");
        }
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn server_proxy_connection(state: &mut ClientState, _header: &str) -> ProxyResult<HeaderOutcome> {
    state.flags.server_proxy_connection_header_set = true;
    Ok(HeaderOutcome::Unchanged)
}

pub fn server_transfer_coding(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if contains_ignore_case(header, "gzip")
        || contains_ignore_case(header, "compress")
        || contains_ignore_case(header, "deflate")
    {
        state.content = ContentClass::taboo();
    } else if contains_ignore_case(header, "chunked") {
        state.flags.chunked = true;
        if state.flags.modified {
            // The body went out de-chunked.
            tracing::debug!(connection_id = %state.id, header = %header, "Removing chunked transfer coding");
            return Ok(HeaderOutcome::Deleted);
        }
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn server_content_disposition(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    match state.action.hide_content_disposition() {
        Some(p) if p.eq_ignore_ascii_case("block") => {
            tracing::debug!(connection_id = %state.id, header = %header, "Crunched Content-Disposition");
            Ok(HeaderOutcome::Deleted)
        }
        Some(p) => Ok(HeaderOutcome::Replaced(format!("Content-Disposition: {p}"))),
        None => Ok(HeaderOutcome::Unchanged),
    }
}

pub fn server_last_modified(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    let Some(parameter) = state.action.overwrite_last_modified() else {
        return Ok(HeaderOutcome::Unchanged);
    };

    if parameter.eq_ignore_ascii_case("block") {
        tracing::debug!(connection_id = %state.id, header = %header, "Crunched Last-Modified");
        return Ok(HeaderOutcome::Deleted);
    }
    if parameter.eq_ignore_ascii_case("reset-to-request-time") {
        return Ok(HeaderOutcome::Replaced(format!("Last-Modified: {}", http_time(0))));
    }
    if !parameter.eq_ignore_ascii_case("randomize") {
        return Ok(HeaderOutcome::Unchanged);
    }

    let Some(last_modified) = parse_header_time(header_value(header)) else {
        tracing::warn!(connection_id = %state.id, header = %header, "Couldn't parse Last-Modified, crunching it");
        return Ok(HeaderOutcome::Deleted);
    };
    let age = (Utc::now() - last_modified).num_seconds();
    if age == 0 {
        return Ok(HeaderOutcome::Unchanged);
    }
    let rewritten = format!("Last-Modified: {}", format_header_time(randomize(last_modified, age)));
    tracing::debug!(connection_id = %state.id, header = %rewritten, "Randomized Last-Modified");
    Ok(HeaderOutcome::Replaced(rewritten))
}

pub fn crunch_server_header(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.action.crunch_server_header().is_some_and(|re| re.is_match(header)) {
        tracing::debug!(connection_id = %state.id, header = %header, "Crunching server header");
        return Ok(HeaderOutcome::Deleted);
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn server_connection_adder(state: &mut ClientState) -> ProxyResult<()> {
    if state.flags.server_connection_header_set {
        return Ok(());
    }

    let http11 = state
        .headers
        .first()
        .is_some_and(|line| starts_with_ignore_case(line, "HTTP/1.1"));
    if state.keep_alive_enabled() && http11 && !state.keep_alive.server_socket_tainted {
        tracing::debug!(connection_id = %state.id, "HTTP/1.1 response without Connection header implies keep-alive");
        state.keep_alive.server = true;
        return Ok(());
    }

    tracing::debug!(connection_id = %state.id, "Adding: Connection: close");
    state.headers.enlist("Connection: close");
    Ok(())
}

pub fn server_proxy_connection_adder(state: &mut ClientState) -> ProxyResult<()> {
    if state.keep_alive.client
        && !state.keep_alive.server_socket_tainted
        && !state.flags.server_proxy_connection_header_set
    {
        tracing::debug!(connection_id = %state.id, "Adding: Proxy-Connection: keep-alive");
        state.headers.enlist("Proxy-Connection: keep-alive");
    }
    Ok(())
}
