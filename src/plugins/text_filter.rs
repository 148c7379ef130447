//! Named regex filters over response bodies.

use regex::bytes::Regex;

use crate::error::{ProxyError, ProxyResult};
use crate::plugins::ContentFilterPlugin;
use crate::proxy::context::ClientState;

/// One `[[filters]]` block: a regex and its replacement.
#[derive(Debug, Clone)]
pub struct TextFilter {
    name: String,
    pattern: Regex,
    replacement: Vec<u8>,
}

impl TextFilter {
    pub fn new(name: &str, pattern: &str, replacement: &str) -> ProxyResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ProxyError::parse(format!("invalid filter pattern for '{name}': {e}")))?;
        Ok(Self {
            name: name.to_string(),
            pattern,
            replacement: replacement.as_bytes().to_vec(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rewritten body, or `None` when nothing matched.
    pub fn apply(&self, body: &[u8]) -> Option<Vec<u8>> {
        if !self.pattern.is_match(body) {
            return None;
        }
        Some(self.pattern.replace_all(body, self.replacement.as_slice()).into_owned())
    }
}

/// Runs the filters named by the request's `filter` action, in the order
/// they were configured.
#[derive(Debug, Default)]
pub struct ActionTextFilters;

impl ContentFilterPlugin for ActionTextFilters {
    fn name(&self) -> &str {
        "text-filters"
    }

    fn is_active(&self, state: &ClientState) -> bool {
        !state.action.filters().is_empty()
    }

    fn run(&self, state: &ClientState, body: &[u8]) -> ProxyResult<Option<Vec<u8>>> {
        let wanted = state.action.filters();
        let mut current: Option<Vec<u8>> = None;

        for filter in state.config.filters.iter().filter(|f| wanted.iter().any(|w| w == f.name())) {
            let input = current.as_deref().unwrap_or(body);
            if let Some(output) = filter.apply(input) {
                tracing::debug!(
                    connection_id = %state.id,
                    filter = filter.name(),
                    before = input.len(),
                    after = output.len(),
                    "Filter modified the body"
                );
                current = Some(output);
            }
        }
        Ok(current)
    }
}
