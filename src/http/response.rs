//! Locally generated responses.
//!
//! # Responsibilities
//! - Canned replies for protocol-level failures (400/502/503/504)
//! - The CONNECT success reply
//! - Error pages for connect and upstream failures
//! - Header finalisation for any crunched response
//!
//! # Design Decisions
//! - Canned replies are compile-time byte strings and never allocate
//! - The out-of-memory page is static too, so it can always be sent
//! - Finalisation only adds headers that are not already present

use crate::http::dates::http_time;
use crate::http::headers::{starts_with_ignore_case, HeaderList};
use crate::http::request::HttpRequest;

/// Crate version reported in the `Proxy-Agent` header.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reply to a CONNECT once the tunnel is up.
pub const CSUCCEED: &str = concat!(
    "HTTP/1.0 200 Connection established\r\n",
    "Proxy-Agent: Seeks proxy/",
    env!("CARGO_PKG_VERSION"),
    "\r\n\r\n"
);

pub const CHEADER: &str = concat!(
    "HTTP/1.0 400 Invalid header received from client\r\n",
    "Proxy-Agent: Seeks proxy ",
    env!("CARGO_PKG_VERSION"),
    "\r\n",
    "Content-Type: text/plain\r\n",
    "Connection: close\r\n\r\n",
    "Invalid header received from client.\r\n"
);

pub const FTP_RESPONSE: &str = concat!(
    "HTTP/1.0 400 Invalid request received from client\r\n",
    "Content-Type: text/plain\r\n",
    "Connection: close\r\n\r\n",
    "Invalid request. Seeks proxy doesn't support FTP.\r\n"
);

pub const GOPHER_RESPONSE: &str = concat!(
    "HTTP/1.0 400 Invalid request received from client\r\n",
    "Content-Type: text/plain\r\n",
    "Connection: close\r\n\r\n",
    "Invalid request. Seeks proxy doesn't support gopher.\r\n"
);

pub const MISSING_DESTINATION_RESPONSE: &str = concat!(
    "HTTP/1.0 400 Bad request received from client\r\n",
    "Proxy-Agent: Seeks proxy ",
    env!("CARGO_PKG_VERSION"),
    "\r\n",
    "Content-Type: text/plain\r\n",
    "Connection: close\r\n\r\n",
    "Bad request. Seeks proxy was unable to extract the destination.\r\n"
);

pub const INVALID_SERVER_HEADERS_RESPONSE: &str = concat!(
    "HTTP/1.0 502 Server or forwarder response invalid\r\n",
    "Proxy-Agent: Seeks proxy ",
    env!("CARGO_PKG_VERSION"),
    "\r\n",
    "Content-Type: text/plain\r\n",
    "Connection: close\r\n\r\n",
    "Bad response. The server or forwarder response doesn't look like HTTP.\r\n"
);

pub const MESSED_UP_REQUEST_RESPONSE: &str = concat!(
    "HTTP/1.0 400 Malformed request after rewriting\r\n",
    "Proxy-Agent: Seeks proxy ",
    env!("CARGO_PKG_VERSION"),
    "\r\n",
    "Content-Type: text/plain\r\n",
    "Connection: close\r\n\r\n",
    "Bad request. Messed up with header filters.\r\n"
);

pub const TOO_MANY_CONNECTIONS_RESPONSE: &str = concat!(
    "HTTP/1.0 503 Too many open connections\r\n",
    "Proxy-Agent: Seeks proxy ",
    env!("CARGO_PKG_VERSION"),
    "\r\n",
    "Content-Type: text/plain\r\n",
    "Connection: close\r\n\r\n",
    "Maximum number of open connections reached.\r\n"
);

pub const CLIENT_CONNECTION_TIMEOUT_RESPONSE: &str = concat!(
    "HTTP/1.0 504 Connection timeout\r\n",
    "Proxy-Agent: Seeks proxy ",
    env!("CARGO_PKG_VERSION"),
    "\r\n",
    "Content-Type: text/plain\r\n",
    "Connection: close\r\n\r\n",
    "The connection timed out because the client request didn't arrive in time.\r\n"
);

/// Sent when a response cannot be built for lack of buffer space.
pub const OUT_OF_MEMORY_RESPONSE: &str = concat!(
    "HTTP/1.0 500 Internal Seeks proxy Error\r\n",
    "Content-Type: text/html\r\n",
    "\r\n",
    "<html>\r\n",
    "<head>\r\n",
    " <title>500 Internal Seeks proxy Error</title>\r\n",
    "</head>\r\n",
    "<body>\r\n",
    "<h1>500 Internal Seeks proxy Error</h1>\r\n",
    "<p>Seeks proxy <b>ran out of memory</b> while processing your request.</p>\r\n",
    "<p>Please contact your proxy administrator, or try again later</p>\r\n",
    "</body>\r\n",
    "</html>\r\n"
);

const LAST_MODIFIED_STATIC: &str = "Sat, 17 Jun 2000 12:00:00 GMT";
const LAST_MODIFIED_ERROR: &str = "Wed, 08 Jun 1955 12:00:00 GMT";
const EXPIRES_DYNAMIC: &str = "Sat, 17 Jun 2000 12:00:00 GMT";

/// Why a request was answered locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrunchReason {
    Unsupported,
    Blocked,
    Untrusted,
    Redirected,
    CgiCall,
    NoSuchDomain,
    ForwardingFailed,
    ConnectFailed,
    OutOfMemory,
    InternalError,
    ConnectionTimeout,
    NoServerData,
}

impl CrunchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrunchReason::Unsupported => "Unsupported",
            CrunchReason::Blocked => "Blocked",
            CrunchReason::Untrusted => "Untrusted",
            CrunchReason::Redirected => "Redirected",
            CrunchReason::CgiCall => "CGI Call",
            CrunchReason::NoSuchDomain => "DNS failure",
            CrunchReason::ForwardingFailed => "Forwarding failed",
            CrunchReason::ConnectFailed => "Connection failure",
            CrunchReason::OutOfMemory => "Out of memory (may mask other reasons)",
            CrunchReason::InternalError => "Internal error",
            CrunchReason::ConnectionTimeout => "Connection timeout",
            CrunchReason::NoServerData => "No server data received",
        }
    }
}

/// Error pages the relay loop can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPage {
    NoSuchDomain,
    ForwardingFailed,
    ConnectFailed,
    ConnectionTimeout,
    NoServerData,
}

impl ErrorPage {
    fn status(&self) -> &'static str {
        match self {
            ErrorPage::NoSuchDomain => "404 No such domain",
            ErrorPage::ForwardingFailed => "503 Forwarding failure",
            ErrorPage::ConnectFailed => "503 Connect failed",
            ErrorPage::ConnectionTimeout => "504 Connection timeout",
            ErrorPage::NoServerData => "502 No data received from server or forwarder",
        }
    }

    fn reason(&self) -> CrunchReason {
        match self {
            ErrorPage::NoSuchDomain => CrunchReason::NoSuchDomain,
            ErrorPage::ForwardingFailed => CrunchReason::ForwardingFailed,
            ErrorPage::ConnectFailed => CrunchReason::ConnectFailed,
            ErrorPage::ConnectionTimeout => CrunchReason::ConnectionTimeout,
            ErrorPage::NoServerData => CrunchReason::NoServerData,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ErrorPage::NoSuchDomain => "This address doesn't exist",
            ErrorPage::ForwardingFailed => "Forwarding failure",
            ErrorPage::ConnectFailed => "Connection to the server failed",
            ErrorPage::ConnectionTimeout => "Connection timeout",
            ErrorPage::NoServerData => "No data received from the server",
        }
    }
}

/// A response produced by the proxy itself.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code and text, e.g. `404 Not Found`. `None` means `200 OK`.
    pub status: Option<String>,
    /// Header lines; the status line is prepended on finalisation.
    pub headers: HeaderList,
    pub body: Vec<u8>,
    /// Cacheable page content.
    pub is_static: bool,
    pub reason: CrunchReason,
    finished: bool,
}

impl HttpResponse {
    pub fn new(reason: CrunchReason) -> Self {
        Self {
            status: None,
            headers: HeaderList::new(),
            body: Vec::new(),
            is_static: false,
            reason,
            finished: false,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, line: impl Into<String>) -> Self {
        self.headers.enlist(line);
        self
    }

    pub fn static_content(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Numeric status for logging.
    pub fn status_code(&self) -> u16 {
        self.status
            .as_deref()
            .and_then(|s| s.get(..3))
            .and_then(|code| code.parse().ok())
            .unwrap_or(200)
    }

    /// Serialized head and body. Call after [`finish_http_response`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.headers.to_text().into_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Add `line` unless a header sharing its first `prefix_len` bytes exists.
fn enlist_unique(headers: &mut HeaderList, line: &str, prefix_len: usize) {
    let prefix = &line[..prefix_len.min(line.len())];
    if !headers.contains_prefix(prefix) {
        headers.enlist(line);
    }
}

fn enlist_unique_header(headers: &mut HeaderList, name: &str, value: &str) {
    let prefix = format!("{name}:");
    if !headers.contains_prefix(&prefix) {
        headers.enlist(format!("{name}: {value}"));
    }
}

/// Complete a crunched response: status line, length, type, dates,
/// cache directives and `Connection: close`.
pub fn finish_http_response(rsp: &mut HttpResponse, http: &HttpRequest) {
    if rsp.finished {
        return;
    }

    let version = if http.ver.eq_ignore_ascii_case("HTTP/1.0") { "HTTP/1.0" } else { "HTTP/1.1" };
    let status = rsp.status.clone().unwrap_or_else(|| "200 OK".to_string());

    let mut headers = HeaderList::new();
    headers.enlist(format!("{version} {status}"));
    for line in rsp.headers.iter() {
        headers.enlist(line);
    }
    headers.enlist(format!("Content-Length: {}", rsp.body.len()));

    if http.is_head() {
        rsp.body.clear();
    }

    let is_redirect = starts_with_ignore_case(&status, "302");
    if !is_redirect {
        enlist_unique(&mut headers, "Content-Type: text/html; charset=UTF-8", 13);
    }

    if rsp.is_static {
        enlist_unique_header(&mut headers, "Date", &http_time(0));
        enlist_unique_header(&mut headers, "Last-Modified", LAST_MODIFIED_STATIC);
        enlist_unique_header(&mut headers, "Expires", &http_time(10 * 60));
    } else if is_redirect {
        enlist_unique_header(&mut headers, "Date", &http_time(0));
    } else {
        let now = http_time(0);
        enlist_unique_header(&mut headers, "Cache-Control", "no-cache");
        enlist_unique_header(&mut headers, "Date", &now);
        let is_error = ["403", "404", "502", "503", "504"]
            .iter()
            .any(|code| starts_with_ignore_case(&status, code));
        if is_error {
            enlist_unique_header(&mut headers, "Last-Modified", LAST_MODIFIED_ERROR);
        } else {
            enlist_unique_header(&mut headers, "Last-Modified", &now);
        }
        enlist_unique_header(&mut headers, "Expires", EXPIRES_DYNAMIC);
        enlist_unique_header(&mut headers, "Pragma", "no-cache");
    }

    enlist_unique_header(&mut headers, "Connection", "close");

    rsp.headers = headers;
    rsp.finished = true;
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render an error page for a failed request.
pub fn error_response(page: ErrorPage, http: &HttpRequest, error_message: Option<&str>) -> HttpResponse {
    let host = html_escape(&http.host);
    let detail = error_message
        .map(|m| format!("<p>Details: <code>{}</code></p>\r\n", html_escape(m)))
        .unwrap_or_default();
    let body = format!(
        "<html>\r\n<head>\r\n <title>{status}</title>\r\n</head>\r\n<body>\r\n\
         <h1>{title}</h1>\r\n<p>Host: <b>{host}</b>, port {port}</p>\r\n{detail}\
         <p>Seeks proxy {version}</p>\r\n</body>\r\n</html>\r\n",
        status = page.status(),
        title = page.title(),
        port = http.port,
        version = VERSION,
    );

    let mut rsp = HttpResponse::new(page.reason())
        .with_status(page.status())
        .with_body(body);
    finish_http_response(&mut rsp, http);
    rsp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::parse_http_request;

    #[test]
    fn connect_reply_is_exact() {
        assert_eq!(
            CSUCCEED,
            format!("HTTP/1.0 200 Connection established\r\nProxy-Agent: Seeks proxy/{VERSION}\r\n\r\n")
        );
    }

    #[test]
    fn dynamic_error_page_headers() {
        let http = parse_http_request("GET http://nowhere.test/ HTTP/1.1").unwrap();
        let rsp = error_response(ErrorPage::NoSuchDomain, &http, Some("lookup failed"));
        let lines: Vec<&str> = rsp.headers.iter().collect();

        assert_eq!(lines[0], "HTTP/1.1 404 No such domain");
        assert!(lines.contains(&format!("Content-Length: {}", rsp.body.len()).as_str()));
        assert!(lines.contains(&"Content-Type: text/html; charset=UTF-8"));
        assert!(lines.contains(&"Cache-Control: no-cache"));
        assert!(lines.contains(&"Last-Modified: Wed, 08 Jun 1955 12:00:00 GMT"));
        assert!(lines.contains(&"Expires: Sat, 17 Jun 2000 12:00:00 GMT"));
        assert!(lines.contains(&"Pragma: no-cache"));
        assert_eq!(lines.last(), Some(&"Connection: close"));
        assert_eq!(rsp.status_code(), 404);
    }

    #[test]
    fn http10_client_gets_http10_status() {
        let http = parse_http_request("GET http://a.test/ HTTP/1.0").unwrap();
        let mut rsp = HttpResponse::new(CrunchReason::CgiCall).with_body("ok");
        finish_http_response(&mut rsp, &http);
        assert_eq!(rsp.headers.first(), Some("HTTP/1.0 200 OK"));
    }

    #[test]
    fn static_page_gets_expiry() {
        let http = parse_http_request("GET http://s.s/ HTTP/1.1").unwrap();
        let mut rsp = HttpResponse::new(CrunchReason::CgiCall)
            .with_body("page")
            .static_content();
        finish_http_response(&mut rsp, &http);
        assert!(rsp.headers.value("Last-Modified:") == Some(LAST_MODIFIED_STATIC));
        assert!(rsp.headers.value("Expires:").is_some());
        assert!(rsp.headers.value("Pragma:").is_none());
    }

    #[test]
    fn redirect_skips_content_type() {
        let http = parse_http_request("GET http://a.test/ HTTP/1.1").unwrap();
        let mut rsp = HttpResponse::new(CrunchReason::Redirected)
            .with_status("302 Local Redirect from Seeks proxy")
            .with_header("Location: http://b.test/");
        finish_http_response(&mut rsp, &http);
        assert!(rsp.headers.value("Content-Type:").is_none());
        assert!(rsp.headers.value("Date:").is_some());
        assert_eq!(rsp.headers.value("Location:"), Some("http://b.test/"));
    }

    #[test]
    fn head_request_drops_body_but_keeps_length() {
        let http = parse_http_request("HEAD http://a.test/ HTTP/1.1").unwrap();
        let mut rsp = HttpResponse::new(CrunchReason::CgiCall).with_body("12345");
        finish_http_response(&mut rsp, &http);
        assert!(rsp.body.is_empty());
        assert_eq!(rsp.headers.value("Content-Length:"), Some("5"));
    }

    #[test]
    fn existing_content_type_is_kept() {
        let http = parse_http_request("GET http://a.test/ HTTP/1.1").unwrap();
        let mut rsp = HttpResponse::new(CrunchReason::Unsupported)
            .with_status("501 Not Implemented")
            .with_header("Content-Type: text/plain");
        finish_http_response(&mut rsp, &http);
        let types = rsp.headers.iter().filter(|h| h.starts_with("Content-Type")).count();
        assert_eq!(types, 1);
    }
}
