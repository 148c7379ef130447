//! The intercepting proxy core.
//!
//! # Data Flow
//! ```text
//! server.rs: Listener::accept
//!     → over the connection limit? → 503, close
//!     → spawn task (span with connection_id)
//!         → serve.rs::serve (loop per kept-alive request)
//!             → chat.rs::chat
//!                 → plugins crunch, header rewrite, connect, relay
//!                 → filter.rs when the body is buffered for filtering
//!             → keep the client? reuse the upstream? hand it to the pool?
//! ```
//!
//! # Design Decisions
//! - One task per client connection; the relay loop selects over both sockets
//! - Each connection reads one configuration snapshot for its lifetime
//! - The upstream socket is owned by the session or by the pool, never both

pub mod chat;
pub mod context;
pub mod filter;
pub mod serve;
pub mod server;

pub use context::ClientState;
pub use serve::{serve, Session, Upstream};
pub use server::{ProxyContext, ProxyServer};
