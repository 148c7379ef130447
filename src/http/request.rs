//! Request-line and URL parsing.
//!
//! # Responsibilities
//! - Split a request line into method, target and version
//! - Reject unknown methods and HTTP versions other than 1.0 and 1.1
//! - Break the target into host, port and path
//! - Recover the destination from `Host:` for intercepted requests
//! - Rebuild the request line sent upstream

use crate::error::{ProxyError, ProxyResult};
use crate::http::headers::{starts_with_ignore_case, HeaderList};

const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "TRACE", "CONNECT",
    // WebDAV
    "PROPFIND", "PROPPATCH", "MOVE", "COPY", "MKCOL", "LOCK", "UNLOCK",
    // Microsoft WebDAV extensions
    "BCOPY", "BMOVE", "BDELETE", "BPROPFIND", "BPROPPATCH",
    "SUBSCRIBE", "UNSUBSCRIBE", "NOTIFY", "POLL",
    // DeltaV
    "VERSION-CONTROL", "REPORT", "CHECKOUT", "CHECKIN", "UNCHECKOUT",
    "MKWORKSPACE", "UPDATE", "LABEL", "MERGE", "BASELINE-CONTROL", "MKACTIVITY",
];

/// Parsed client request line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    /// Full request line as currently sent.
    pub cmd: String,
    /// Request line as received from the client.
    pub ocmd: String,
    /// Method.
    pub gpc: String,
    /// Request target.
    pub url: String,
    /// Protocol version.
    pub ver: String,
    /// Destination host; empty when the request line carried none.
    pub host: String,
    /// Destination port.
    pub port: u16,
    /// Path component.
    pub path: String,
    /// `host[:port]` as written, user info included.
    pub hostport: String,
    /// CONNECT request or https URL.
    pub ssl: bool,
}

impl HttpRequest {
    /// Whether the request line named a destination host.
    pub fn has_host(&self) -> bool {
        !self.host.is_empty()
    }

    pub fn is_method(&self, method: &str) -> bool {
        self.gpc.eq_ignore_ascii_case(method)
    }

    pub fn is_http11(&self) -> bool {
        self.ver.eq_ignore_ascii_case("HTTP/1.1")
    }

    pub fn is_head(&self) -> bool {
        self.is_method("HEAD")
    }
}

/// Whether `method` is outside the set the proxy knows how to relay.
pub fn unknown_method(method: &str) -> bool {
    !KNOWN_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

/// Whether the request line asks for a protocol the proxy does not speak.
pub fn unsupported_protocol(request_line: &str) -> Option<&'static str> {
    if starts_with_ignore_case(request_line, "GET ftp://") {
        Some("ftp")
    } else if starts_with_ignore_case(request_line, "GET gopher://") {
        Some("gopher")
    } else {
        None
    }
}

/// Parse a request line such as `GET http://host/ HTTP/1.1`.
pub fn parse_http_request(line: &str) -> ProxyResult<HttpRequest> {
    let parts: Vec<&str> = line
        .split(|c| c == ' ' || c == '\r' || c == '\n')
        .filter(|p| !p.is_empty())
        .collect();
    let [method, target, version] = parts.as_slice() else {
        return Err(ProxyError::parse(format!("request line has {} fields", parts.len())));
    };

    if unknown_method(method) {
        tracing::error!(method = %method, "Unknown HTTP method detected");
        return Err(ProxyError::parse(format!("unknown method {method}")));
    }

    if !version.eq_ignore_ascii_case("HTTP/1.1") && !version.eq_ignore_ascii_case("HTTP/1.0") {
        tracing::error!(version = %version, "Only HTTP versions 1.0 and 1.1 are supported");
        return Err(ProxyError::parse(format!("unsupported version {version}")));
    }

    let mut http = HttpRequest {
        ssl: method.eq_ignore_ascii_case("CONNECT"),
        ..HttpRequest::default()
    };
    let require_protocol = !http.ssl;
    parse_http_url(target, &mut http, require_protocol)?;

    http.cmd = line.to_string();
    http.ocmd = line.to_string();
    http.gpc = method.to_string();
    http.ver = version.to_string();
    Ok(http)
}

/// Split a request target into host, port and path.
pub fn parse_http_url(url: &str, http: &mut HttpRequest, require_protocol: bool) -> ProxyResult<()> {
    http.url = url.to_string();

    if let Some(rest) = url.strip_prefix('*') {
        http.path = "*".to_string();
        http.hostport.clear();
        if !rest.is_empty() {
            return Err(ProxyError::parse("garbage after '*' target"));
        }
        return Ok(());
    }

    let mut host_available = true;
    let noproto = if starts_with_ignore_case(url, "http://") {
        &url[7..]
    } else if starts_with_ignore_case(url, "https://") {
        http.ssl = true;
        &url[8..]
    } else if url.starts_with('/') {
        host_available = false;
        url
    } else if require_protocol {
        return Err(ProxyError::parse(format!("no protocol in {url}")));
    } else {
        url
    };

    match noproto.find('/') {
        Some(slash) => {
            http.path = if http.ssl { "/".to_string() } else { noproto[slash..].to_string() };
            http.hostport = noproto[..slash].to_string();
        }
        None => {
            http.path = "/".to_string();
            http.hostport = noproto.to_string();
        }
    }

    if !host_available {
        http.host.clear();
        return Ok(());
    }

    let (host, port) = split_hostport(&http.hostport, http.ssl)?;
    http.host = host;
    http.port = port;
    Ok(())
}

/// Split `[user@]host[:port]` or `[user@][v6addr][:port]`.
fn split_hostport(hostport: &str, ssl: bool) -> ProxyResult<(String, u16)> {
    let host = match hostport.find('@') {
        Some(at) => &hostport[at + 1..],
        None => hostport,
    };

    let (name, port) = if let Some(bracketed) = host.strip_prefix('[') {
        let close = bracketed
            .find(']')
            .ok_or_else(|| ProxyError::parse("missing closing bracket in IPv6 host"))?;
        let after = &bracketed[close + 1..];
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p),
            None if after.is_empty() => None,
            None => return Err(ProxyError::parse("garbage after IPv6 host")),
        };
        (&bracketed[..close], port)
    } else {
        match host.find(':') {
            Some(colon) => (&host[..colon], Some(&host[colon + 1..])),
            None => (host, None),
        }
    };

    let port = match port {
        Some(p) => parse_port_lenient(p),
        None => default_port(ssl),
    };
    Ok((name.to_string(), port))
}

/// Leading digits as a port; anything unparsable yields 0.
fn parse_port_lenient(text: &str) -> u16 {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

pub fn default_port(ssl: bool) -> u16 {
    if ssl {
        443
    } else {
        80
    }
}

/// Take the destination from the `Host:` header and rebuild the URL.
pub fn get_destination_from_headers(headers: &HeaderList, http: &mut HttpRequest) -> ProxyResult<()> {
    let value = headers.value("Host:").ok_or_else(|| {
        tracing::error!("No Host header found");
        ProxyError::parse("no Host header")
    })?;
    let hostport = value.trim_end().to_string();

    match hostport.find(':') {
        Some(colon) => {
            http.host = hostport[..colon].to_string();
            http.port = parse_port_lenient(&hostport[colon + 1..]);
        }
        None => {
            http.host = hostport.clone();
            http.port = default_port(http.ssl);
        }
    }
    http.hostport = hostport;

    let scheme = if http.ssl { "https://" } else { "http://" };
    http.url = format!("{scheme}{}{}", http.hostport, http.path);

    tracing::debug!(url = %http.url, "Destination extracted from Host header");
    Ok(())
}

/// Request line sent upstream: the full URL through an HTTP parent,
/// the path otherwise.
pub fn build_request_line(http: &HttpRequest, via_parent_proxy: bool) -> String {
    let target = if via_parent_proxy { &http.url } else { &http.path };
    let line = format!("{} {} {}", http.gpc, target, http.ver);
    tracing::debug!(request_line = %line, "New HTTP request line");
    line
}
