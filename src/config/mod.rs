//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ActiveConfig (rule tables compiled, immutable)
//!     → ArcSwap snapshot taken per client connection
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<ActiveConfig>
//!     → new connections observe new config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{ActiveConfig, ConfigError};
pub use schema::ProxyConfig;
pub use schema::ListenerConfig;
pub use schema::TimeoutConfig;
pub use schema::FeatureConfig;
pub use schema::LimitsConfig;
