//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HubConfig (validated, immutable)
//!     → shared via ArcSwap to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap into SharedConfig
//!     → sweeper, auth and notifier read the new values on next use
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

use std::sync::Arc;

use arc_swap::ArcSwap;

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{AgentConfig, HubConfig};

/// Live configuration, replaced wholesale on reload.
pub type SharedConfig = Arc<ArcSwap<HubConfig>>;

/// Wrap a loaded configuration for sharing.
pub fn shared(config: HubConfig) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}
