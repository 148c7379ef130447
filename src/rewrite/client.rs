//! Client request header handlers and adders.

use crate::error::ProxyResult;
use crate::http::dates::{format_header_time, parse_header_time, pick_from_range};
use crate::http::headers::starts_with_ignore_case;
use crate::http::request::default_port;
use crate::proxy::context::{ClientState, ContentClass};
use crate::rewrite::pipeline::HeaderOutcome;

use super::{header_value, leading_int};

const DEFAULT_IF_MODIFIED_SINCE: &str = "If-Modified-Since: Wed, 08 Jun 1955 12:00:00 GMT";

pub fn client_referrer(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    let Some(parameter) = state.action.hide_referrer() else {
        return Ok(HeaderOutcome::Unchanged);
    };

    let conditional_block = parameter.eq_ignore_ascii_case("conditional-block");
    if conditional_block || parameter.eq_ignore_ascii_case("conditional-forge") {
        return Ok(conditional_referrer(state, header, conditional_block));
    }

    if parameter.eq_ignore_ascii_case("block") {
        tracing::debug!(connection_id = %state.id, header = %header, "Referer crunched");
        return Ok(HeaderOutcome::Deleted);
    }
    if parameter.eq_ignore_ascii_case("forge") {
        return Ok(HeaderOutcome::Replaced(forged_referrer(&state.http.hostport)));
    }

    if !starts_with_ignore_case(parameter, "http://") && !starts_with_ignore_case(parameter, "https://") {
        tracing::warn!(
            connection_id = %state.id,
            parameter = %parameter,
            "Parameter of hide-referrer is neither 'block', 'forge' nor an http(s) URL"
        );
    }
    Ok(HeaderOutcome::Replaced(format!("Referer: {parameter}")))
}

fn forged_referrer(hostport: &str) -> String {
    format!("Referer: http://{hostport}/")
}

/// Keep the referer only while it points at the host being requested.
fn conditional_referrer(state: &ClientState, header: &str, block: bool) -> HeaderOutcome {
    let host = state.http.hostport.to_ascii_lowercase();
    let mut referer = header.to_ascii_lowercase();
    // "Referer: http://" is 17 bytes; cut right after the host so a longer
    // host sharing the prefix does not pass.
    let cut = host.len() + 17;
    if cut < referer.len() && referer.is_char_boundary(cut) {
        referer.truncate(cut);
    }

    let same_host = referer
        .find("http://")
        .map(|at| referer[at..].contains(&host))
        .unwrap_or(false);
    if same_host {
        return HeaderOutcome::Unchanged;
    }

    if block {
        tracing::debug!(connection_id = %state.id, header = %header, "Referer crunched, host changed");
        HeaderOutcome::Deleted
    } else {
        tracing::debug!(connection_id = %state.id, header = %header, "Referer forged, host changed");
        HeaderOutcome::Replaced(forged_referrer(&state.http.hostport))
    }
}

pub fn client_user_agent(state: &mut ClientState, _header: &str) -> ProxyResult<HeaderOutcome> {
    Ok(match state.action.hide_user_agent() {
        Some(agent) => HeaderOutcome::Replaced(format!("User-Agent: {agent}")),
        None => HeaderOutcome::Unchanged,
    })
}

pub fn client_ua(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.action.hide_user_agent().is_some() {
        tracing::debug!(connection_id = %state.id, header = %header, "ua header crunched");
        return Ok(HeaderOutcome::Deleted);
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn client_from(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    let Some(from) = state.action.hide_from() else {
        return Ok(HeaderOutcome::Unchanged);
    };
    if from.eq_ignore_ascii_case("block") {
        tracing::debug!(connection_id = %state.id, header = %header, "From header crunched");
        return Ok(HeaderOutcome::Deleted);
    }
    Ok(HeaderOutcome::Replaced(format!("From: {from}")))
}

pub fn client_send_cookie(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.action.crunch_outgoing_cookies() {
        tracing::debug!(connection_id = %state.id, header = %header, "Crunched outgoing cookie");
        return Ok(HeaderOutcome::Deleted);
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn client_x_forwarded(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    match state.action.change_x_forwarded_for() {
        Some(p) if p.eq_ignore_ascii_case("block") => {
            tracing::debug!(connection_id = %state.id, "Crunched X-Forwarded-For");
            Ok(HeaderOutcome::Deleted)
        }
        Some(p) if p.eq_ignore_ascii_case("add") => {
            state.flags.x_forwarded_for_appended = true;
            let appended = format!("{header}, {}", state.ip_addr);
            tracing::debug!(connection_id = %state.id, header = %appended, "Appended client IP");
            Ok(HeaderOutcome::Replaced(appended))
        }
        _ => Ok(HeaderOutcome::Unchanged),
    }
}

pub fn client_accept_encoding(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    crunch_if_compression_prevented(state, header)
}

pub fn client_te(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    crunch_if_compression_prevented(state, header)
}

fn crunch_if_compression_prevented(state: &ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.action.prevent_compression() {
        tracing::debug!(connection_id = %state.id, header = %header, "Suppressed offer to compress content");
        return Ok(HeaderOutcome::Deleted);
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn client_host(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    // An all-caps "HOST:" duplicate is dropped.
    if header.as_bytes().get(1) == Some(&b'O') {
        tracing::debug!(connection_id = %state.id, header = %header, "Removed duplicate host header");
        return Ok(HeaderOutcome::Deleted);
    }

    let hostport = &state.http.hostport;
    if hostport.is_empty() || hostport.starts_with('*') || hostport.starts_with(' ') {
        let value = header_value(header).to_string();
        let (host, port) = split_host_port(&value);
        state.http.host = host.to_string();
        state.http.port = port.unwrap_or_else(|| default_port(state.http.ssl));
        state.http.hostport = value;
    }

    state.flags.host_header_set = true;
    Ok(HeaderOutcome::Unchanged)
}

/// Split `host[:port]` or `[ipv6][:port]`.
fn split_host_port(value: &str) -> (&str, Option<u16>) {
    if let Some(rest) = value.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':').and_then(|p| p.parse().ok())),
            None => (rest, None),
        };
    }
    match value.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (value, None),
        },
        None => (value, None),
    }
}

pub fn client_if_modified_since(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if header.eq_ignore_ascii_case(DEFAULT_IF_MODIFIED_SINCE) {
        tracing::debug!(connection_id = %state.id, "Crunched useless If-Modified-Since");
        return Ok(HeaderOutcome::Deleted);
    }

    let Some(parameter) = state.action.hide_if_modified_since() else {
        return Ok(HeaderOutcome::Unchanged);
    };
    if parameter.eq_ignore_ascii_case("block") {
        tracing::debug!(connection_id = %state.id, header = %header, "Crunched If-Modified-Since");
        return Ok(HeaderOutcome::Deleted);
    }

    let Some(time) = parse_header_time(header_value(header)) else {
        tracing::warn!(connection_id = %state.id, header = %header, "Couldn't parse date, crunching it");
        return Ok(HeaderOutcome::Deleted);
    };

    let minutes = leading_int(parameter).unwrap_or(0);
    if minutes == 0 {
        return Ok(HeaderOutcome::Unchanged);
    }
    let shift = pick_from_range(minutes.abs() * 60);
    let shift = if minutes < 0 { -shift } else { shift };
    let randomized = time + chrono::Duration::seconds(shift);
    let rewritten = format!("If-Modified-Since: {}", format_header_time(randomized));
    tracing::debug!(connection_id = %state.id, header = %rewritten, seconds = shift, "Randomized If-Modified-Since");
    Ok(HeaderOutcome::Replaced(rewritten))
}

pub fn client_keep_alive(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if !state.keep_alive_enabled() {
        tracing::debug!(connection_id = %state.id, header = %header, "Keep-alive disabled, crunched");
        return Ok(HeaderOutcome::Deleted);
    }

    if let Some(timeout) = leading_int(header_value(header)).filter(|t| *t >= 0) {
        let timeout = timeout as u64;
        if timeout < state.configured_keep_alive_timeout() {
            tracing::debug!(connection_id = %state.id, timeout, "Client keep-alive timeout is lower than ours");
            state.server_connection.keep_alive_timeout = timeout;
        }
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn client_connection(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    state.flags.client_connection_header_set = true;

    if header.eq_ignore_ascii_case("Connection: close") {
        if state.connection_sharing_enabled() {
            if state.http.is_http11() {
                tracing::debug!(connection_id = %state.id, "Removing 'Connection: close' to imply keep-alive");
                return Ok(HeaderOutcome::Deleted);
            }
            tracing::debug!(connection_id = %state.id, "Replacing 'Connection: close' with keep-alive");
            return Ok(HeaderOutcome::Replaced("Connection: keep-alive".into()));
        }
        tracing::debug!(connection_id = %state.id, "Keeping the client header 'Connection: close'");
        state.keep_alive.client = false;
        return Ok(HeaderOutcome::Unchanged);
    }

    if state.keep_alive_enabled() {
        tracing::debug!(connection_id = %state.id, header = %header, "Keeping the client connection header");
        state.keep_alive.client = true;
        return Ok(HeaderOutcome::Unchanged);
    }

    Ok(HeaderOutcome::Replaced("Connection: close".into()))
}

pub fn client_max_forwards(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if !state.http.is_method("TRACE") && !state.http.is_method("OPTIONS") {
        return Ok(HeaderOutcome::Unchanged);
    }

    match leading_int(header_value(header)) {
        Some(n) if n > 0 => Ok(HeaderOutcome::Replaced(format!("Max-Forwards: {}", n - 1))),
        Some(0) => Ok(HeaderOutcome::Unchanged),
        _ => {
            tracing::debug!(connection_id = %state.id, header = %header, "Crunched invalid Max-Forwards");
            Ok(HeaderOutcome::Deleted)
        }
    }
}

pub fn client_accept_language(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    match state.action.hide_accept_language() {
        Some(p) if p.eq_ignore_ascii_case("block") => {
            tracing::debug!(connection_id = %state.id, header = %header, "Crunched Accept-Language");
            Ok(HeaderOutcome::Deleted)
        }
        Some(p) => Ok(HeaderOutcome::Replaced(format!("Accept-Language: {p}"))),
        None => Ok(HeaderOutcome::Unchanged),
    }
}

pub fn client_if_none_match(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.action.crunch_if_none_match() {
        tracing::debug!(connection_id = %state.id, header = %header, "Crunched If-None-Match");
        return Ok(HeaderOutcome::Deleted);
    }
    Ok(HeaderOutcome::Unchanged)
}

/// Partial responses cannot be filtered, so range requests are dropped
/// whenever a filter would run.
pub fn client_range(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.content_filters_enabled {
        tracing::debug!(connection_id = %state.id, header = %header, "Content filtering is enabled, crunching range");
        return Ok(HeaderOutcome::Deleted);
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn client_x_filter(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if !header.eq_ignore_ascii_case("X-Filter: No") {
        return Ok(HeaderOutcome::Unchanged);
    }

    if !state.http_toggle_enabled() {
        tracing::info!(connection_id = %state.id, "Ignored the client's request to fetch without filtering");
        return Ok(HeaderOutcome::Unchanged);
    }

    if state.action.force_text_mode() {
        tracing::info!(
            connection_id = %state.id,
            "Ignored the client's request to fetch without filtering because force-text-mode is set"
        );
    } else {
        state.content = ContentClass::taboo();
        state.flags.no_filtering = true;
        tracing::info!(connection_id = %state.id, "Accepted the client's request to fetch without filtering");
    }
    Ok(HeaderOutcome::Deleted)
}

pub fn crunch_client_header(state: &mut ClientState, header: &str) -> ProxyResult<HeaderOutcome> {
    if state.action.crunch_client_header().is_some_and(|re| re.is_match(header)) {
        tracing::debug!(connection_id = %state.id, header = %header, "Crunching client header");
        return Ok(HeaderOutcome::Deleted);
    }
    Ok(HeaderOutcome::Unchanged)
}

pub fn client_host_adder(state: &mut ClientState) -> ProxyResult<()> {
    if state.flags.host_header_set || state.http.hostport.is_empty() {
        return Ok(());
    }

    // Strip "user:pass@".
    let hostport = &state.http.hostport;
    let host = hostport.rsplit_once('@').map_or(hostport.as_str(), |(_, h)| h);
    if !state.headers.contains_prefix("Host:") {
        let header = format!("Host: {host}");
        tracing::debug!(connection_id = %state.id, header = %header, "Adding host header");
        state.headers.enlist(header);
    }
    Ok(())
}

pub fn client_x_forwarded_for_adder(state: &mut ClientState) -> ProxyResult<()> {
    let add = state
        .action
        .change_x_forwarded_for()
        .is_some_and(|p| p.eq_ignore_ascii_case("add"));
    if add && !state.flags.x_forwarded_for_appended {
        let header = format!("X-Forwarded-For: {}", state.ip_addr);
        tracing::debug!(connection_id = %state.id, header = %header, "Adding header");
        state.headers.enlist(header);
    }
    Ok(())
}

pub fn client_xtra_adder(state: &mut ClientState) -> ProxyResult<()> {
    let extra: Vec<String> = state.action.add_headers().to_vec();
    for header in extra {
        tracing::debug!(connection_id = %state.id, header = %header, "Adding configured header");
        state.headers.enlist(header);
    }
    Ok(())
}

pub fn client_connection_header_adder(state: &mut ClientState) -> ProxyResult<()> {
    if !state.flags.client_header_parsing_done && state.flags.client_connection_header_set {
        return Ok(());
    }

    if state.keep_alive_enabled() && !state.http.ssl && state.http.is_http11() {
        state.keep_alive.client = true;
        return Ok(());
    }

    tracing::debug!(connection_id = %state.id, "Adding: Connection: close");
    state.headers.enlist("Connection: close");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::http::request::parse_http_request;
    use crate::proxy::context::tests::{state, state_with};
    use crate::rewrite::pipeline::{sed, HeaderSide};
    use crate::routing::actions::{ActionSettings, CurrentAction};

    fn with_action(s: &mut ClientState, f: impl FnOnce(&mut ActionSettings)) {
        let mut settings = ActionSettings::default();
        f(&mut settings);
        s.action = CurrentAction::from_settings(settings).unwrap();
    }

    fn request(line: &str) -> ClientState {
        let mut s = state();
        s.http = parse_http_request(line).unwrap();
        s.headers.enlist(line);
        s
    }

    #[test]
    fn referrer_policies() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        assert_eq!(
            client_referrer(&mut s, "Referer: http://other.test/").unwrap(),
            HeaderOutcome::Unchanged
        );

        with_action(&mut s, |a| a.hide_referrer = Some("block".into()));
        assert_eq!(client_referrer(&mut s, "Referer: http://other.test/").unwrap(), HeaderOutcome::Deleted);

        with_action(&mut s, |a| a.hide_referrer = Some("forge".into()));
        assert_eq!(
            client_referrer(&mut s, "Referer: http://other.test/").unwrap(),
            HeaderOutcome::Replaced("Referer: http://example.test/".into())
        );

        with_action(&mut s, |a| a.hide_referrer = Some("http://fixed.test/".into()));
        assert_eq!(
            client_referrer(&mut s, "Referer: http://other.test/").unwrap(),
            HeaderOutcome::Replaced("Referer: http://fixed.test/".into())
        );
    }

    #[test]
    fn conditional_referrer_keeps_same_host() {
        let mut s = request("GET http://example.test/page HTTP/1.1");
        with_action(&mut s, |a| a.hide_referrer = Some("conditional-block".into()));
        assert_eq!(
            client_referrer(&mut s, "Referer: http://example.test/index").unwrap(),
            HeaderOutcome::Unchanged
        );
        assert_eq!(
            client_referrer(&mut s, "Referer: http://elsewhere.test/example.test").unwrap(),
            HeaderOutcome::Deleted
        );

        with_action(&mut s, |a| a.hide_referrer = Some("conditional-forge".into()));
        assert_eq!(
            client_referrer(&mut s, "Referer: https://example.test/").unwrap(),
            HeaderOutcome::Replaced("Referer: http://example.test/".into())
        );
    }

    #[test]
    fn from_block_or_replace() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        with_action(&mut s, |a| a.hide_from = Some("block".into()));
        assert_eq!(client_from(&mut s, "From: me@example.test").unwrap(), HeaderOutcome::Deleted);
        with_action(&mut s, |a| a.hide_from = Some("nobody@example.test".into()));
        assert_eq!(
            client_from(&mut s, "From: me@example.test").unwrap(),
            HeaderOutcome::Replaced("From: nobody@example.test".into())
        );
    }

    #[test]
    fn x_forwarded_for_is_appended_once() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        s.headers.enlist("X-Forwarded-For: 10.0.0.1");
        with_action(&mut s, |a| a.change_x_forwarded_for = Some("add".into()));
        sed(&mut s, HeaderSide::Client).unwrap();

        let values: Vec<&str> = s.headers.iter().filter(|h| h.starts_with("X-Forwarded-For")).collect();
        assert_eq!(values, ["X-Forwarded-For: 10.0.0.1, 192.0.2.7"]);
    }

    #[test]
    fn x_forwarded_for_added_when_missing() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        with_action(&mut s, |a| a.change_x_forwarded_for = Some("add".into()));
        sed(&mut s, HeaderSide::Client).unwrap();
        assert_eq!(s.headers.value("X-Forwarded-For:"), Some("192.0.2.7"));
    }

    #[test]
    fn max_forwards_decrements_for_trace() {
        let mut s = request("TRACE http://example.test/ HTTP/1.1");
        assert_eq!(
            client_max_forwards(&mut s, "Max-Forwards: 3").unwrap(),
            HeaderOutcome::Replaced("Max-Forwards: 2".into())
        );
        assert_eq!(client_max_forwards(&mut s, "Max-Forwards: 0").unwrap(), HeaderOutcome::Unchanged);
        assert_eq!(client_max_forwards(&mut s, "Max-Forwards: -1").unwrap(), HeaderOutcome::Deleted);
        assert_eq!(client_max_forwards(&mut s, "Max-Forwards: lots").unwrap(), HeaderOutcome::Deleted);

        let mut get = request("GET http://example.test/ HTTP/1.1");
        assert_eq!(client_max_forwards(&mut get, "Max-Forwards: 3").unwrap(), HeaderOutcome::Unchanged);
    }

    #[test]
    fn connection_close_becomes_implicit_keep_alive_on_http11() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        assert_eq!(client_connection(&mut s, "Connection: close").unwrap(), HeaderOutcome::Deleted);
        assert!(s.flags.client_connection_header_set);

        let mut s = request("GET http://example.test/ HTTP/1.0");
        assert_eq!(
            client_connection(&mut s, "Connection: close").unwrap(),
            HeaderOutcome::Replaced("Connection: keep-alive".into())
        );
    }

    #[test]
    fn connection_close_kept_without_sharing() {
        let mut config = ProxyConfig::default();
        config.features.connection_sharing = false;
        let mut s = state_with(config);
        s.http = parse_http_request("GET http://example.test/ HTTP/1.1").unwrap();
        s.keep_alive.client = true;
        assert_eq!(client_connection(&mut s, "Connection: close").unwrap(), HeaderOutcome::Unchanged);
        assert!(!s.keep_alive.client);
    }

    #[test]
    fn connection_replaced_when_keep_alive_disabled() {
        let mut config = ProxyConfig::default();
        config.features.keep_alive = false;
        let mut s = state_with(config);
        s.http = parse_http_request("GET http://example.test/ HTTP/1.1").unwrap();
        assert_eq!(
            client_connection(&mut s, "Connection: keep-alive").unwrap(),
            HeaderOutcome::Replaced("Connection: close".into())
        );
    }

    #[test]
    fn client_keep_alive_only_shortens_timeout() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        client_keep_alive(&mut s, "Keep-Alive: 300").unwrap();
        assert_eq!(s.server_connection.keep_alive_timeout, 5);
        client_keep_alive(&mut s, "Keep-Alive: 2").unwrap();
        assert_eq!(s.server_connection.keep_alive_timeout, 2);
    }

    #[test]
    fn host_header_fills_missing_destination() {
        let mut s = state();
        s.http = parse_http_request("GET / HTTP/1.1").unwrap();
        client_host(&mut s, "Host: intercepted.test:8080").unwrap();
        assert_eq!(s.http.host, "intercepted.test");
        assert_eq!(s.http.port, 8080);
        assert!(s.flags.host_header_set);
        assert_eq!(client_host(&mut s, "HOST: dup.test").unwrap(), HeaderOutcome::Deleted);
    }

    #[test]
    fn host_adder_strips_credentials() {
        let mut s = request("GET http://user:pw@example.test/ HTTP/1.1");
        client_host_adder(&mut s).unwrap();
        assert_eq!(s.headers.value("Host:"), Some("example.test"));
    }

    #[test]
    fn connection_adder_marks_http11_keep_alive() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        client_connection_header_adder(&mut s).unwrap();
        assert!(s.keep_alive.client);
        assert!(!s.headers.contains_prefix("Connection:"));

        let mut s = request("GET http://example.test/ HTTP/1.0");
        client_connection_header_adder(&mut s).unwrap();
        assert_eq!(s.headers.value("Connection:"), Some("close"));
    }

    #[test]
    fn if_modified_since_handling() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        assert_eq!(
            client_if_modified_since(&mut s, DEFAULT_IF_MODIFIED_SINCE).unwrap(),
            HeaderOutcome::Deleted
        );

        with_action(&mut s, |a| a.hide_if_modified_since = Some("-60".into()));
        let original = "If-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT";
        let HeaderOutcome::Replaced(rewritten) = client_if_modified_since(&mut s, original).unwrap() else {
            panic!("expected a rewritten header");
        };
        let before = parse_header_time("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        let after = parse_header_time(header_value(&rewritten)).unwrap();
        let diff = (before - after).num_seconds();
        assert!((1..=3600).contains(&diff), "shifted by {diff}");

        assert_eq!(
            client_if_modified_since(&mut s, "If-Modified-Since: yesterday").unwrap(),
            HeaderOutcome::Deleted
        );
    }

    #[test]
    fn x_filter_marks_request_unfiltered() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        assert_eq!(client_x_filter(&mut s, "X-Filter: No").unwrap(), HeaderOutcome::Deleted);
        assert!(s.flags.no_filtering);
        assert!(s.content.taboo);

        let mut s = request("GET http://example.test/ HTTP/1.1");
        with_action(&mut s, |a| a.force_text_mode = Some(true));
        assert_eq!(client_x_filter(&mut s, "X-Filter: No").unwrap(), HeaderOutcome::Deleted);
        assert!(!s.flags.no_filtering);
    }

    #[test]
    fn range_dropped_only_when_filtering() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        assert_eq!(client_range(&mut s, "Range: bytes=0-10").unwrap(), HeaderOutcome::Unchanged);
        s.content_filters_enabled = true;
        assert_eq!(client_range(&mut s, "Range: bytes=0-10").unwrap(), HeaderOutcome::Deleted);
    }

    #[test]
    fn extra_headers_and_crunch_pattern() {
        let mut s = request("GET http://example.test/ HTTP/1.1");
        s.headers.enlist("X-Tracking-Id: 42");
        with_action(&mut s, |a| {
            a.add_header = vec!["X-Do-Not-Track: 1".into()];
            a.crunch_client_header = Some("^X-Tracking".into());
        });
        sed(&mut s, HeaderSide::Client).unwrap();
        assert!(!s.headers.contains_prefix("X-Tracking-Id:"));
        assert_eq!(s.headers.value("X-Do-Not-Track:"), Some("1"));
    }
}
