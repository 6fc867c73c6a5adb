use cellar_core::descriptor::DescriptorId;
use cellar_core::error::{CoreError, DescriptorError};
use std::path::PathBuf;
use thiserror::Error;

/// Failure to start an application.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The executable recorded in the descriptor no longer exists.
    #[error("Executable {path:?} for '{id}' does not exist")]
    TargetMissing { id: DescriptorId, path: PathBuf },
    #[error("Launch arguments for '{id}' cannot be parsed: {reason}")]
    InvalidArguments { id: DescriptorId, reason: String },
    #[error("Failed to spawn '{command}' for '{id}'")]
    SpawnFailed {
        id: DescriptorId,
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Descriptor unavailable: {0}")]
    Descriptor(#[from] DescriptorError),
}

/// Failure to query or signal the OS process table.
///
/// A process that no longer exists is not an error; see
/// [`crate::process_table::SignalOutcome::NotFound`].
#[derive(Error, Debug)]
pub enum ProcessTableError {
    #[error("Process table query for '{pattern}' failed: {reason}")]
    ProbeQueryFailed { pattern: String, reason: String },
    #[error("Failed to signal {target}: {source}")]
    Signal {
        target: String,
        #[source]
        source: nix::Error,
    },
}

/// Failure on the single-instance rendezvous socket.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Malformed launch request: {0:?}")]
    IpcMalformed(String),
    #[error("Requested directory {0:?} does not exist")]
    ResolveDirectoryMissing(PathBuf),
    #[error("No file matches {0:?}")]
    NoMatch(PathBuf),
    #[error("Failed to bind rendezvous socket {path:?}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to lock {path:?}")]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    /// Another instance holds the lock but never started listening.
    #[error("Running instance at {path:?} does not answer")]
    Unreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Rendezvous socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to read where a Windows shortcut points.
#[derive(Error, Debug)]
pub enum ShortcutError {
    #[error("Failed to run '{command}' on {path:?}: {reason}")]
    ReaderFailed {
        command: String,
        path: PathBuf,
        reason: String,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("'{0}' already has a run record")]
    AlreadyRunning(DescriptorId),
}

/// Umbrella error for the system layer.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    ProcessTable(#[from] ProcessTableError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Shortcut(#[from] ShortcutError),
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
    /// The owner loop is gone; nothing can be posted to it any more.
    #[error("Owner loop has shut down")]
    OwnerGone,
}
