//! Configuration Data Structures for Cellar.
//!
//! These structs are populated by deserializing a TOML configuration file.
//! Missing fields take their values from the [`super::defaults`] module, and
//! unknown fields are rejected via `#[serde(deny_unknown_fields)]`.

use super::defaults;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration settings for the logging subsystem.
///
/// # Examples
///
/// ```
/// use cellar_core::config::LoggingConfig;
/// use std::path::PathBuf;
///
/// let default_log_config = LoggingConfig::default();
/// assert_eq!(default_log_config.level, "info");
/// assert_eq!(default_log_config.file_path, None);
/// assert_eq!(default_log_config.format, "text");
///
/// let toml_str = r#"
/// level = "debug"
/// file_path = "/var/log/cellar.log"
/// format = "json"
/// "#;
/// let log_config: LoggingConfig = toml::from_str(toml_str).unwrap();
/// assert_eq!(log_config.file_path, Some(PathBuf::from("/var/log/cellar.log")));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of "trace", "debug", "info", "warn", "error" (case-insensitive).
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// Optional log file. Relative paths are resolved against the state directory.
    #[serde(default = "defaults::default_log_file_path")]
    pub file_path: Option<PathBuf>,
    /// "text" or "json".
    #[serde(default = "defaults::default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        defaults::default_logging_config()
    }
}

/// Filesystem locations used by the launcher.
///
/// Relative `prefixes_dir` and `socket_path` values are resolved against
/// `data_dir` during validation. An unset `data_dir` falls back to the
/// application data directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    #[serde(default = "defaults::default_data_dir")]
    pub data_dir: Option<PathBuf>,
    /// Directory holding one isolated environment ("prefix") per application.
    #[serde(default = "defaults::default_prefixes_dir")]
    pub prefixes_dir: PathBuf,
    /// Rendezvous socket used for single-instance detection.
    #[serde(default = "defaults::default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        defaults::default_paths_config()
    }
}

/// Process supervision settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Compatibility-layer executable used to run applications.
    #[serde(default = "defaults::default_runner")]
    pub runner: String,
    /// Seconds between two liveness probes.
    #[serde(default = "defaults::default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Seconds to wait after a primary process exits before re-scanning its prefix.
    #[serde(default = "defaults::default_settle_delay_secs")]
    pub settle_delay_secs: u64,
    /// Text identifying this launcher's own processes in the process table.
    #[serde(default = "defaults::default_self_signature")]
    pub self_signature: String,
}

impl SupervisorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        defaults::default_supervisor_config()
    }
}

/// Root configuration structure.
///
/// # Examples
///
/// ```
/// use cellar_core::config::CoreConfig;
///
/// let toml_str = r#"
/// [logging]
/// level = "warn"
///
/// [supervisor]
/// runner = "wine64"
/// "#;
/// let loaded: CoreConfig = toml::from_str(toml_str).unwrap();
/// assert_eq!(loaded.logging.level, "warn");
/// assert_eq!(loaded.supervisor.runner, "wine64");
/// assert_eq!(loaded.supervisor.probe_interval_secs, 3);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_logging_config_default_values() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.file_path, None);
        assert_eq!(config.format, "text");
    }

    #[test]
    fn test_supervisor_config_default_values() {
        let config = SupervisorConfig::default();
        assert_eq!(config.runner, "wine");
        assert_eq!(config.probe_interval(), Duration::from_secs(3));
        assert_eq!(config.settle_delay(), Duration::from_secs(5));
        assert_eq!(config.self_signature, "cellar");
    }

    #[test]
    fn test_paths_config_default_values() {
        let config = PathsConfig::default();
        assert_eq!(config.data_dir, None);
        assert_eq!(config.prefixes_dir, PathBuf::from("Prefixes"));
        assert_eq!(config.socket_path, PathBuf::from("cellar.sock"));
    }

    #[test]
    fn test_core_config_deserialize_empty() {
        let config: CoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.supervisor.runner, "wine");
    }

    #[test]
    fn test_core_config_deserialize_partial_sections() {
        let json = r#"{
            "paths": { "data_dir": "/srv/cellar" },
            "supervisor": { "probe_interval_secs": 10 }
        }"#;
        let config: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.paths.data_dir, Some(PathBuf::from("/srv/cellar")));
        assert_eq!(config.paths.prefixes_dir, PathBuf::from("Prefixes"));
        assert_eq!(config.supervisor.probe_interval_secs, 10);
        assert_eq!(config.supervisor.settle_delay_secs, 5);
    }

    #[test]
    #[should_panic]
    fn test_supervisor_config_deserialize_unknown_field() {
        let json = r#"{"runner": "wine", "cpu_quota": 2}"#;
        let _config: SupervisorConfig = serde_json::from_str(json).unwrap();
    }

    #[test]
    #[should_panic]
    fn test_core_config_deserialize_unknown_section() {
        let json = r#"{"logging": {}, "compositor": {}}"#;
        let _config: CoreConfig = serde_json::from_str(json).unwrap();
    }
}
