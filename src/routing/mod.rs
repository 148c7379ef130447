//! Rule matching subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request (host, port, path)
//!     → matcher.rs (evaluate URL patterns)
//!     → forward.rs (first matching forward rule, else direct)
//!     → actions.rs (merge every matching action rule)
//!
//! Rule compilation (at config load):
//!     [[forward]] / [[actions]]
//!     → compile patterns and regexes
//!     → freeze as immutable tables
//! ```
//!
//! # Design Decisions
//! - Tables are compiled once per configuration and never mutated
//! - Forwarding: first match wins; actions: every match merges in order
//! - A static direct forwarder is always available

pub mod actions;
pub mod forward;
pub mod matcher;

pub use actions::{ActionRule, ActionSettings, ActionTable, CurrentAction};
pub use forward::{ForwardRule, ForwardSpec, ForwardTable, ForwardType, ForwarderAddress};
pub use matcher::{Matcher, UrlPattern};
