//! Preparing a buffered body for the content filters.
//!
//! The filters always work on a copy. When de-chunking or decompression
//! fails the buffered bytes are delivered as they arrived.

use crate::http::decode::{decompress, remove_chunked_transfer_coding, ContentCoding};
use crate::plugins::PluginRegistry;
use crate::proxy::context::ClientState;

/// Decode and filter the body buffered in `state.iob`.
///
/// Returns the body to deliver when it differs from the buffered bytes,
/// with `flags.modified` and `content_length` updated to match.
pub fn filter_response_body(state: &mut ClientState, plugins: &PluginRegistry) -> Option<Vec<u8>> {
    let mut decoded: Option<Vec<u8>> = None;

    if state.flags.chunked {
        match remove_chunked_transfer_coding(state.iob.unconsumed()) {
            Ok(body) => decoded = Some(body),
            Err(e) => {
                tracing::error!(connection_id = %state.id, error = %e, "Failed to de-chunk the body, delivering it unfiltered");
                return None;
            }
        }
    }

    let coding = if state.content.gzip {
        Some(ContentCoding::Gzip)
    } else if state.content.deflate {
        Some(ContentCoding::Deflate)
    } else {
        None
    };
    if let Some(coding) = coding {
        let input = decoded.as_deref().unwrap_or(state.iob.unconsumed());
        if input.is_empty() {
            tracing::debug!(connection_id = %state.id, "Nothing to decompress");
        } else {
            match decompress(input, coding, state.iob.limit()) {
                Ok(body) => {
                    tracing::debug!(
                        connection_id = %state.id,
                        compressed = input.len(),
                        decompressed = body.len(),
                        "Decompressed the body"
                    );
                    decoded = Some(body);
                }
                Err(e) => {
                    tracing::error!(connection_id = %state.id, error = %e, "Failed to decompress the body, delivering it unfiltered");
                    return None;
                }
            }
        }
    }

    let input = decoded.as_deref().unwrap_or(state.iob.unconsumed());
    let filtered = match plugins.filter_body(state, input) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(connection_id = %state.id, error = %e, "Content filter failed");
            None
        }
    };

    let body = filtered.or(decoded)?;
    state.flags.modified = true;
    state.content_length = body.len() as u64;
    Some(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ActionRuleConfig, TextFilterConfig};
    use crate::config::ProxyConfig;
    use crate::proxy::context::tests::{state, state_with};
    use crate::routing::actions::ActionSettings;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn filtering_state() -> ClientState {
        let mut config = ProxyConfig::default();
        config.filters.push(TextFilterConfig {
            name: "greet".into(),
            pattern: "hello".into(),
            replacement: "howdy".into(),
        });
        config.actions.push(ActionRuleConfig {
            pattern: String::new(),
            settings: ActionSettings {
                filter: vec!["greet".into()],
                ..ActionSettings::default()
            },
        });
        let mut s = state_with(config);
        s.action = s.config.actions.resolve(&s.http);
        s
    }

    #[test]
    fn chunked_body_is_decoded_then_filtered() {
        let mut s = filtering_state();
        s.flags.chunked = true;
        s.iob.append(b"5\r\nhello\r\n0\r\n\r\n").unwrap();

        let body = filter_response_body(&mut s, &PluginRegistry::new()).unwrap();
        assert_eq!(body, b"howdy");
        assert!(s.flags.modified);
        assert_eq!(s.content_length, 5);
    }

    #[test]
    fn gzip_body_is_inflated() {
        let mut s = filtering_state();
        s.content.gzip = true;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"say hello").unwrap();
        s.iob.append(&encoder.finish().unwrap()).unwrap();

        let body = filter_response_body(&mut s, &PluginRegistry::new()).unwrap();
        assert_eq!(body, b"say howdy");
    }

    #[test]
    fn broken_chunking_delivers_original() {
        let mut s = filtering_state();
        s.flags.chunked = true;
        s.iob.append(b"zz\r\nhello").unwrap();

        assert!(filter_response_body(&mut s, &PluginRegistry::new()).is_none());
        assert!(!s.flags.modified);
    }

    #[test]
    fn untouched_body_is_not_modified() {
        let mut s = state();
        s.iob.append(b"plain").unwrap();
        assert!(filter_response_body(&mut s, &PluginRegistry::new()).is_none());
        assert!(!s.flags.modified);
    }
}
