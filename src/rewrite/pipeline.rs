//! Header rewrite registry and the `sed` pass.
//!
//! A table maps header-name prefixes to handlers. Each rule scans the
//! whole header list in turn, so a later rule sees the edits of earlier
//! ones. Adders run once afterwards to synthesize headers nobody set.

use crate::error::ProxyResult;
use crate::http::headers::{starts_with_ignore_case, HeaderEntry};
use crate::proxy::context::ClientState;
use crate::rewrite::{client, server};

/// What a handler decided for one header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOutcome {
    Unchanged,
    Replaced(String),
    Deleted,
}

/// Which headers a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPattern {
    /// Case-insensitive name prefix, colon included where relevant.
    Prefix(&'static str),
    /// Every header still present when the rule runs.
    Wildcard,
}

impl HeaderPattern {
    fn matches(&self, line: &str) -> bool {
        match self {
            HeaderPattern::Prefix(prefix) => starts_with_ignore_case(line, prefix),
            HeaderPattern::Wildcard => true,
        }
    }
}

pub type HeaderHandler = fn(&mut ClientState, &str) -> ProxyResult<HeaderOutcome>;
pub type HeaderAdder = fn(&mut ClientState) -> ProxyResult<()>;

/// One row of a rewrite table.
#[derive(Clone, Copy)]
pub struct HeaderRule {
    pub pattern: HeaderPattern,
    pub handler: HeaderHandler,
}

impl std::fmt::Debug for HeaderRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderRule").field("pattern", &self.pattern).finish()
    }
}

const fn prefix(name: &'static str, handler: HeaderHandler) -> HeaderRule {
    HeaderRule {
        pattern: HeaderPattern::Prefix(name),
        handler,
    }
}

const fn wildcard(handler: HeaderHandler) -> HeaderRule {
    HeaderRule {
        pattern: HeaderPattern::Wildcard,
        handler,
    }
}

pub const CLIENT_PATTERNS: &[HeaderRule] = &[
    prefix("referer:", client::client_referrer),
    prefix("user-agent:", client::client_user_agent),
    prefix("ua-", client::client_ua),
    prefix("from:", client::client_from),
    prefix("cookie:", client::client_send_cookie),
    prefix("x-forwarded-for:", client::client_x_forwarded),
    prefix("Accept-Encoding:", client::client_accept_encoding),
    prefix("TE:", client::client_te),
    prefix("Host:", client::client_host),
    prefix("if-modified-since:", client::client_if_modified_since),
    prefix("Keep-Alive:", client::client_keep_alive),
    prefix("connection:", client::client_connection),
    prefix("proxy-connection:", crumble),
    prefix("max-forwards:", client::client_max_forwards),
    prefix("Accept-Language:", client::client_accept_language),
    prefix("if-none-match:", client::client_if_none_match),
    prefix("Range:", client::client_range),
    prefix("Request-Range:", client::client_range),
    prefix("If-Range:", client::client_range),
    prefix("X-Filter:", client::client_x_filter),
    wildcard(client::crunch_client_header),
];

pub const SERVER_PATTERNS: &[HeaderRule] = &[
    prefix("HTTP/", server::server_http),
    prefix("set-cookie:", server::server_set_cookie),
    prefix("connection:", server::server_connection),
    prefix("Content-Type:", server::server_content_type),
    prefix("Content-MD5:", server::server_content_md5),
    prefix("Content-Encoding:", server::server_content_encoding),
    prefix("Content-Length:", server::server_save_content_length),
    prefix("Keep-Alive:", server::server_keep_alive),
    prefix("Proxy-Connection:", server::server_proxy_connection),
    prefix("Transfer-Encoding:", server::server_transfer_coding),
    prefix("content-disposition:", server::server_content_disposition),
    prefix("Last-Modified:", server::server_last_modified),
    wildcard(server::crunch_server_header),
];

/// Rules re-run after the body has been modified.
const SERVER_PATTERNS_LIGHT: &[HeaderRule] = &[
    prefix("Content-Length:", server::server_adjust_content_length),
    prefix("Transfer-Encoding:", server::server_transfer_coding),
    prefix("Content-Encoding:", server::server_content_encoding),
];

pub const CLIENT_ADDERS: &[HeaderAdder] = &[
    client::client_host_adder,
    client::client_x_forwarded_for_adder,
    client::client_xtra_adder,
    client::client_connection_header_adder,
];

pub const SERVER_ADDERS: &[HeaderAdder] = &[
    server::server_connection_adder,
    server::server_proxy_connection_adder,
];

/// Which side's headers a `sed` pass rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSide {
    Client,
    Server,
}

/// Delete a header unconditionally.
pub fn crumble(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    tracing::debug!(connection_id = %state.id, header = %header, "crumble crunched");
    Ok(HeaderOutcome::Deleted)
}

/// Run `rules` over every present header of `state`.
pub fn apply_rules(state: &mut ClientState, rules: &[HeaderRule]) -> ProxyResult<()> {
    for rule in rules {
        for index in 0..state.headers.entries().len() {
            let line = match &state.headers.entries()[index] {
                HeaderEntry::Present(line) if rule.pattern.matches(line) => line.clone(),
                _ => continue,
            };

            match (rule.handler)(state, &line)? {
                HeaderOutcome::Unchanged => {}
                HeaderOutcome::Replaced(new) => {
                    state.headers.entries_mut()[index] = HeaderEntry::Present(new);
                }
                HeaderOutcome::Deleted => {
                    state.headers.entries_mut()[index] = HeaderEntry::Deleted;
                }
            }
        }
    }
    Ok(())
}

/// Rewrite the headers of one side, then run that side's adders.
pub fn sed(state: &mut ClientState, side: HeaderSide) -> ProxyResult<()> {
    let (rules, adders) = match side {
        HeaderSide::Client => (CLIENT_PATTERNS, CLIENT_ADDERS),
        HeaderSide::Server => (SERVER_PATTERNS, SERVER_ADDERS),
    };

    apply_rules(state, rules)?;
    for adder in adders {
        adder(state)?;
    }
    Ok(())
}

/// Fix up framing headers once the body has been filtered.
pub fn update_server_headers(state: &mut ClientState) -> ProxyResult<()> {
    if !state.http.is_head() {
        apply_rules(state, SERVER_PATTERNS_LIGHT)?;
    }

    if state.flags.modified && state.keep_alive.client && !state.flags.server_content_length_set {
        let header = format!("Content-Length: {}", state.content_length);
        tracing::debug!(
            connection_id = %state.id,
            header = %header,
            "Content modified with no Content-Length header set"
        );
        state.headers.enlist(header);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::parse_http_request;
    use crate::proxy::context::tests::state;

    fn request_state(lines: &[&str]) -> ClientState {
        let mut s = state();
        s.http = parse_http_request(lines[0]).unwrap();
        for line in lines {
            s.headers.enlist(*line);
        }
        s
    }

    #[test]
    fn untouched_headers_pass_through() {
        let mut s = request_state(&[
            "GET http://example.test/ HTTP/1.1",
            "Host: example.test",
            "Accept: */*",
            "X-Custom:  odd   spacing",
        ]);
        sed(&mut s, HeaderSide::Client).unwrap();

        let lines: Vec<&str> = s.headers.iter().collect();
        assert!(lines.contains(&"Accept: */*"));
        assert!(lines.contains(&"X-Custom:  odd   spacing"));
        assert!(lines.contains(&"Host: example.test"));
    }

    #[test]
    fn proxy_connection_is_always_removed() {
        let mut s = request_state(&[
            "GET http://example.test/ HTTP/1.1",
            "Proxy-Connection: keep-alive",
        ]);
        sed(&mut s, HeaderSide::Client).unwrap();
        assert!(!s.headers.contains_prefix("Proxy-Connection:"));
    }

    #[test]
    fn later_rules_see_earlier_edits() {
        let mut s = request_state(&["GET http://example.test/ HTTP/1.1", "Cookie: a=b"]);
        let mut settings = crate::routing::actions::ActionSettings::default();
        settings.crunch_outgoing_cookies = Some(true);
        settings.crunch_client_header = Some("Cookie".into());
        s.action = crate::routing::actions::CurrentAction::from_settings(settings).unwrap();

        // The cookie rule deletes the line before the wildcard rule runs,
        // so the wildcard never sees it.
        sed(&mut s, HeaderSide::Client).unwrap();
        assert!(!s.headers.contains_prefix("Cookie:"));
        assert!(s.headers.entries().contains(&HeaderEntry::Deleted));
    }

    #[test]
    fn content_length_added_after_modification() {
        let mut s = request_state(&["GET http://example.test/ HTTP/1.1"]);
        s.headers.clear();
        s.headers.enlist("HTTP/1.1 200 OK");
        s.headers.enlist("Transfer-Encoding: chunked");
        s.flags.modified = true;
        s.keep_alive.client = true;
        s.content_length = 11;

        update_server_headers(&mut s).unwrap();
        let lines: Vec<&str> = s.headers.iter().collect();
        assert_eq!(lines, ["HTTP/1.1 200 OK", "Content-Length: 11"]);
    }

    #[test]
    fn existing_content_length_is_regenerated() {
        let mut s = request_state(&["GET http://example.test/ HTTP/1.1"]);
        s.headers.clear();
        s.headers.enlist("HTTP/1.1 200 OK");
        s.headers.enlist("Content-Length: 100");
        s.flags.modified = true;
        s.flags.server_content_length_set = true;
        s.content_length = 42;

        update_server_headers(&mut s).unwrap();
        assert_eq!(s.headers.value("Content-Length:"), Some("42"));
    }
}
