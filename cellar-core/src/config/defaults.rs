//! Default configuration values for Cellar.
//!
//! These functions are used by `serde`'s `default` attribute in the
//! configuration structures.

use crate::config::{LoggingConfig, PathsConfig, SupervisorConfig};
use std::path::PathBuf;

pub(super) fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file_path: default_log_file_path(),
        format: default_log_format(),
    }
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_log_file_path() -> Option<PathBuf> {
    None
}

pub(super) fn default_log_format() -> String {
    "text".to_string()
}

pub(super) fn default_paths_config() -> PathsConfig {
    PathsConfig {
        data_dir: default_data_dir(),
        prefixes_dir: default_prefixes_dir(),
        socket_path: default_socket_path(),
    }
}

/// `None` means "use the application data directory".
pub(super) fn default_data_dir() -> Option<PathBuf> {
    None
}

pub(super) fn default_prefixes_dir() -> PathBuf {
    PathBuf::from("Prefixes")
}

pub(super) fn default_socket_path() -> PathBuf {
    PathBuf::from("cellar.sock")
}

pub(super) fn default_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        runner: default_runner(),
        probe_interval_secs: default_probe_interval_secs(),
        settle_delay_secs: default_settle_delay_secs(),
        self_signature: default_self_signature(),
    }
}

pub(super) fn default_runner() -> String {
    "wine".to_string()
}

pub(super) fn default_probe_interval_secs() -> u64 {
    3
}

/// Long enough for installers to spawn their continuation processes.
pub(super) fn default_settle_delay_secs() -> u64 {
    5
}

pub(super) fn default_self_signature() -> String {
    "cellar".to_string()
}
