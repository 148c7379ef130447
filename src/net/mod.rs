//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, client connection limit)
//!     → connection.rs (id, active tracking)
//!     → proxy::serve
//!
//! socket.rs probes client and upstream sockets without reading them.
//! ```
//!
//! # Design Decisions
//! - Over-limit connections are accepted and answered, not left in the backlog
//! - Each connection is tracked so shutdown can drain them

pub mod connection;
pub mod listener;
pub mod socket;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use socket::{data_is_available, socket_is_still_usable};
