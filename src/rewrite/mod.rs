//! Header rewrite pipeline.
//!
//! # Data Flow
//! ```text
//! client headers (HeaderList)
//!     → pipeline::sed(Client): client table in order, then client adders
//!     → request line rebuilt, sent upstream
//!
//! server headers (HeaderList)
//!     → pipeline::sed(Server): server table in order, then server adders
//!     → body filtered?
//!         → pipeline::update_server_headers (framing fixed up)
//!     → sent to client
//! ```
//!
//! # Design Decisions
//! - Handlers are plain functions over `ClientState`, so they are tested
//!   without sockets
//! - A handler returns a `HeaderOutcome` instead of editing the list in place
//! - Deleted headers stay as `HeaderEntry::Deleted` until serialization

pub mod client;
pub mod pipeline;
pub mod server;

pub use pipeline::{sed, update_server_headers, HeaderOutcome, HeaderPattern, HeaderRule, HeaderSide};

/// Text after the header name's colon, leading spaces skipped.
pub(crate) fn header_value(header: &str) -> &str {
    header
        .split_once(':')
        .map_or("", |(_, value)| value.trim_start_matches([' ', '\t']))
}

/// Leading decimal integer of `text`, ignoring anything after it.
pub(crate) fn leading_int(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let digits_end = text
        .char_indices()
        .skip_while(|(i, c)| *i == 0 && (*c == '-' || *c == '+'))
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(text.len(), |(i, _)| i);
    text[..digits_end].parse().ok()
}
