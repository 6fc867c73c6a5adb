//! Error types for the Cellar core layer.
//!
//! [`CoreError`] is what the core's public functions return. It wraps the
//! narrower [`ConfigError`], [`LoggingError`] and [`DescriptorError`], so a
//! descriptor failure can be propagated with `?` from code returning
//! `Result<_, CoreError>`:
//!
//! ```rust
//! use cellar_core::descriptor::{DescriptorId, DescriptorStore};
//! use cellar_core::error::CoreError;
//!
//! fn launch_arguments(store: &DescriptorStore, id: &DescriptorId) -> Result<String, CoreError> {
//!     Ok(store.find(id)?.launch_arguments)
//! }
//! ```

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for Cellar.
///
/// It is designed to be used as a common error type throughout the
/// application, often by wrapping more specific error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Errors related to configuration loading, parsing, or validation.
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    /// Errors raised while setting up the logging system.
    #[error("Logging Error: {0}")]
    Logging(#[from] LoggingError),

    /// Errors raised while reading or writing application descriptors.
    #[error("Descriptor Error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Filesystem operations not covered by a more specific variant.
    #[error("Filesystem Error: {message} (Path: {path:?})")]
    Filesystem {
        message: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Error type for configuration-related operations.
///
/// Typically wrapped by [`CoreError::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An error occurred while attempting to read a configuration file.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML or does not match the schema.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration parsed, but one of its values is not acceptable.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// A required base directory (e.g., XDG config/data home) could not be determined.
    #[error("Could not determine base directory for {dir_type}")]
    DirectoryUnavailable { dir_type: String },
}

/// Error type for logging-related operations.
#[derive(Error, Debug)]
pub enum LoggingError {
    /// Failed to install the global subscriber.
    #[error("Failed to initialize logging: {0}")]
    InitializationFailure(String),
}

/// Error type for application descriptor storage.
///
/// A descriptor failure is always local to one descriptor: callers scanning
/// many descriptors log it and move on.
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// No descriptor file with the requested identity exists.
    #[error("No descriptor found for '{id}'")]
    NotFound { id: String },

    /// The descriptor file exists but cannot be decoded.
    #[error("Malformed descriptor file {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// A relocated executable does not hash to the recorded content hash.
    #[error("{path:?} does not match the recorded executable (expected {expected}, found {actual})")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Reading or writing a descriptor (or hashing its executable) failed.
    #[error("Descriptor I/O failed for {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
