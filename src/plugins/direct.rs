//! Requests the proxy answers itself because they must go no further.

use crate::http::headers::starts_with_ignore_case;
use crate::http::response::{CrunchReason, HttpResponse};
use crate::plugins::InterceptorPlugin;
use crate::proxy::context::ClientState;
use crate::rewrite::{header_value, leading_int};

/// TRACE and OPTIONS with `Max-Forwards: 0` stop at the proxy.
#[derive(Debug, Default)]
pub struct MaxForwardsResponder;

impl InterceptorPlugin for MaxForwardsResponder {
    fn name(&self) -> &str {
        "max-forwards"
    }

    fn maybe_respond(&self, state: &ClientState) -> Option<HttpResponse> {
        if !state.http.is_method("TRACE") && !state.http.is_method("OPTIONS") {
            return None;
        }
        let header = state
            .headers
            .iter()
            .find(|h| starts_with_ignore_case(h, "Max-Forwards:"))?;
        if leading_int(header_value(header)) != Some(0) {
            return None;
        }

        tracing::info!(connection_id = %state.id, method = %state.http.gpc, "Max-Forwards reached zero");
        Some(
            HttpResponse::new(CrunchReason::Unsupported)
                .with_status("501 Not Implemented")
                .with_body(format!("{} is not supported by Seeks proxy.\r\n", state.http.gpc)),
        )
    }
}
