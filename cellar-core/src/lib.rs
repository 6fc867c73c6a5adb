//! # Cellar Core Library (`cellar-core`)
//!
//! Foundation shared by the Cellar crates:
//!
//! - **Error Handling**: [`CoreError`] and the specific [`ConfigError`],
//!   [`LoggingError`] and [`DescriptorError`] types.
//! - **Configuration**: TOML configuration merged from system and user files,
//!   see [`config::ConfigLoader`].
//! - **Logging**: `tracing`-based console and file logging, see [`logging`].
//! - **Descriptors**: the `.charm` files that tie an executable to its
//!   isolated environment, see [`descriptor::DescriptorStore`].
//! - **Utilities**: filesystem helpers, content hashing and path resolution.
//!
//! ```rust,no_run
//! use cellar_core::config::ConfigLoader;
//! use cellar_core::logging::init_logging;
//! use cellar_core::error::CoreError;
//!
//! fn main() -> Result<(), CoreError> {
//!     let core_config = ConfigLoader::load()?;
//!     init_logging(&core_config.logging, false)?;
//!     tracing::info!("Cellar core initialized.");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod utils;

pub use config::{ConfigLoader, CoreConfig, LoggingConfig, PathsConfig, SupervisorConfig};
pub use descriptor::{AppDescriptor, DescriptorId, DescriptorStore};
pub use error::{ConfigError, CoreError, DescriptorError, LoggingError};
pub use logging::{init_logging, init_minimal_logging};
