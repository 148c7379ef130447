//! Magic-host pages served by the proxy itself.

use std::collections::HashMap;

use crate::error::{ProxyError, ProxyResult};
use crate::http::response::{finish_http_response, HttpResponse, CrunchReason, VERSION};
use crate::proxy::context::ClientState;

/// Hosts whose requests never leave the proxy.
const CGI_HOSTS: [&str; 2] = ["s.s", "config.seeks.info"];

/// Path prefix that pushes a request past the toggle-dependent crunchers.
pub const FORCE_PREFIX: &str = "/SEEKS-PROXY-FORCE";

/// Decoded query parameters of a page request.
pub type CgiParams = HashMap<String, String>;

/// Renders the pages behind the magic hosts.
pub trait CgiDispatcher: Send + Sync + std::fmt::Debug {
    /// `page` is the request path without its query string.
    fn dispatch(&self, state: &ClientState, page: &str, params: &CgiParams) -> ProxyResult<HttpResponse>;
}

pub fn is_cgi_host(host: &str) -> bool {
    CGI_HOSTS.iter().any(|h| h.eq_ignore_ascii_case(host))
}

/// Remove the first occurrence of the force prefix from a raw request
/// line. Returns whether it was there.
pub fn strip_force_prefix(request_line: &mut String) -> bool {
    match request_line.find(FORCE_PREFIX) {
        Some(at) => {
            request_line.replace_range(at..at + FORCE_PREFIX.len(), "");
            true
        }
        None => false,
    }
}

/// Split `a=1&b=two%20words` into a map. Later duplicates win.
pub fn parse_cgi_parameters(query: &str) -> ProxyResult<CgiParams> {
    let mut params = CgiParams::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(url_decode(name)?, url_decode(value)?);
    }
    Ok(params)
}

fn url_decode(text: &str) -> ProxyResult<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| ProxyError::CgiParams(format!("bad escape in '{text}'")))?;
                out.push(hex);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8(out).map_err(|_| ProxyError::CgiParams(format!("'{text}' is not UTF-8")))
}

/// Answer a magic-host request through `dispatcher`. `None` for any other
/// host.
pub(crate) fn intercept(dispatcher: &dyn CgiDispatcher, state: &ClientState) -> Option<HttpResponse> {
    if !is_cgi_host(&state.http.host) {
        return None;
    }

    let (page, query) = state.http.path.split_once('?').unwrap_or((&state.http.path, ""));
    tracing::debug!(connection_id = %state.id, page = %page, "Dispatching proxy page");

    let result = parse_cgi_parameters(query).and_then(|params| dispatcher.dispatch(state, page, &params));
    let mut rsp = match result {
        Ok(rsp) => rsp,
        Err(ProxyError::CgiParams(message)) => {
            tracing::warn!(connection_id = %state.id, page = %page, error = %message, "Bad page parameters");
            HttpResponse::new(CrunchReason::CgiCall)
                .with_status("400 Invalid header received from client")
                .with_body(format!("Invalid parameters: {message}\r\n"))
        }
        Err(e) => {
            tracing::error!(connection_id = %state.id, page = %page, error = %e, "Page failed");
            HttpResponse::new(CrunchReason::InternalError)
                .with_status("500 Internal Seeks proxy Error")
                .with_body("Internal error while rendering the page.\r\n")
        }
    };
    finish_http_response(&mut rsp, &state.http);
    Some(rsp)
}

/// Status page at `/`, 404 everywhere else.
#[derive(Debug, Default)]
pub struct BuiltinCgi;

impl CgiDispatcher for BuiltinCgi {
    fn dispatch(&self, state: &ClientState, page: &str, _params: &CgiParams) -> ProxyResult<HttpResponse> {
        if page != "/" {
            return Ok(HttpResponse::new(CrunchReason::CgiCall)
                .with_status("404 Seeks proxy configuration page not found")
                .with_body(format!(
                    "<html><head><title>404</title></head><body>\
                     <h1>Page not found</h1><p>{} is not a Seeks proxy page.</p></body></html>\r\n",
                    escape(page)
                )));
        }

        let active = &state.config;
        let body = format!(
            "<html><head><title>Seeks proxy {VERSION}</title></head><body>\r\n\
             <h1>Seeks proxy {VERSION}</h1>\r\n\
             <p>Proxying is <b>{toggle}</b>.</p>\r\n\
             <ul>\r\n<li>Forward rules: {forward}</li>\r\n<li>Action rules: {actions}</li>\r\n\
             <li>Text filters: {filters}</li>\r\n<li>Your address: {client}</li>\r\n</ul>\r\n\
             </body></html>\r\n",
            toggle = if state.toggled_on { "enabled" } else { "disabled" },
            forward = active.forward.len(),
            actions = active.actions.len(),
            filters = active.filters.len(),
            client = escape(&state.ip_addr),
        );
        Ok(HttpResponse::new(CrunchReason::CgiCall).with_body(body))
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
