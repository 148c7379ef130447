//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Ctrl+C received (main.rs)
//!     → Shutdown::trigger
//!     → accept loop stops
//!     → pool sweeper stops
//!     → in-flight connections finish on their own
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
