//! Interceptors and content filters.
//!
//! # Data Flow
//! ```text
//! parsed request
//!     → cgi.rs (magic hosts, always consulted)
//!     → toggled on and not forced?
//!         → direct.rs (Max-Forwards: 0 on TRACE/OPTIONS)
//!         → registered interceptors, first response wins
//!
//! buffered text body
//!     → content filters in registration order
//! ```
//!
//! # Design Decisions
//! - Plugins are trait objects registered once at startup
//! - Interceptors see the request before any header is rewritten

pub mod cgi;
pub mod direct;
pub mod text_filter;

use std::sync::Arc;

use crate::error::ProxyResult;
use crate::http::response::HttpResponse;
use crate::proxy::context::ClientState;

pub use cgi::{strip_force_prefix, BuiltinCgi, CgiDispatcher, CgiParams, FORCE_PREFIX};
pub use direct::MaxForwardsResponder;
pub use text_filter::{ActionTextFilters, TextFilter};

/// Answers a request locally instead of forwarding it.
pub trait InterceptorPlugin: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// A response for the client, or `None` to let the request through.
    fn maybe_respond(&self, state: &ClientState) -> Option<HttpResponse>;
}

/// Transforms a buffered response body.
pub trait ContentFilterPlugin: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn is_active(&self, state: &ClientState) -> bool;

    /// The new body, or `None` when the filter left it alone.
    fn run(&self, state: &ClientState, body: &[u8]) -> ProxyResult<Option<Vec<u8>>>;
}

/// Every plugin the relay loop consults.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    cgi: Arc<dyn CgiDispatcher>,
    interceptors: Vec<Arc<dyn InterceptorPlugin>>,
    content_filters: Vec<Arc<dyn ContentFilterPlugin>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self {
            cgi: Arc::new(BuiltinCgi),
            interceptors: Vec::new(),
            content_filters: vec![Arc::new(ActionTextFilters)],
        }
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cgi_dispatcher(mut self, cgi: Arc<dyn CgiDispatcher>) -> Self {
        self.cgi = cgi;
        self
    }

    pub fn with_interceptor(mut self, plugin: Arc<dyn InterceptorPlugin>) -> Self {
        self.interceptors.push(plugin);
        self
    }

    pub fn with_content_filter(mut self, plugin: Arc<dyn ContentFilterPlugin>) -> Self {
        self.content_filters.push(plugin);
        self
    }

    /// Run the interceptors in order. The magic-host pages always answer;
    /// the others only while the proxy is toggled on and the request is
    /// not forced.
    pub fn crunch(&self, state: &ClientState) -> Option<HttpResponse> {
        if let Some(rsp) = cgi::intercept(self.cgi.as_ref(), state) {
            return Some(rsp);
        }
        if !state.toggled_on || state.flags.forced {
            return None;
        }
        if let Some(rsp) = MaxForwardsResponder.maybe_respond(state) {
            return Some(rsp);
        }
        self.interceptors.iter().find_map(|plugin| {
            let rsp = plugin.maybe_respond(state)?;
            tracing::info!(connection_id = %state.id, plugin = plugin.name(), url = %state.http.url, "Request crunched");
            Some(rsp)
        })
    }

    /// Whether any content filter wants the body of this response.
    pub fn any_filter_active(&self, state: &ClientState) -> bool {
        self.content_filters.iter().any(|f| f.is_active(state))
    }

    /// Pass `body` through every active content filter. `None` when no
    /// filter changed it.
    pub fn filter_body(&self, state: &ClientState, body: &[u8]) -> ProxyResult<Option<Vec<u8>>> {
        let mut current: Option<Vec<u8>> = None;
        for filter in self.content_filters.iter().filter(|f| f.is_active(state)) {
            let input = current.as_deref().unwrap_or(body);
            if let Some(output) = filter.run(state, input)? {
                current = Some(output);
            }
        }
        Ok(current)
    }
}
