//! Configuration Management for Cellar Core.
//!
//! - [`types`]: the configuration schema ([`CoreConfig`], [`LoggingConfig`],
//!   [`PathsConfig`], [`SupervisorConfig`]).
//! - [`defaults`]: default values used by `serde` when a field is absent.
//! - [`loader`]: [`ConfigLoader`], which merges the system and user TOML files
//!   and validates the result.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cellar_core::config::ConfigLoader;
//!
//! match ConfigLoader::load() {
//!     Ok(config) => println!("Prefixes live in {}", config.paths.prefixes_dir.display()),
//!     Err(e) => {
//!         cellar_core::logging::init_minimal_logging();
//!         tracing::error!("Configuration loading failed: {}", e);
//!     }
//! }
//! ```

mod defaults;
pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{CoreConfig, LoggingConfig, PathsConfig, SupervisorConfig};
