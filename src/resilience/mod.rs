//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! gateway::forwarded_connect fails with an invalid-input error
//!     → backoff.rs (delay grows per attempt)
//!     → next attempt, up to limits.forwarded_connect_retries
//! ```

pub mod backoff;
