//! Configuration Loading for Cellar Core.
//!
//! [`ConfigLoader`] reads an optional system-wide `config.toml` and the user's
//! `config.toml`, merges them (user values win, table by table), deserializes
//! the result into a [`CoreConfig`] and validates it.
//!
//! ## Configuration File Location
//!
//! - System file: `/etc/cellar/config.toml`, overridable through the
//!   `CELLAR_SYSTEM_CONFIG` environment variable.
//! - User file: `config.toml` inside [`get_app_config_dir`], or the path given
//!   to [`ConfigLoader::load_from`].
//!
//! Missing or empty files are skipped; if neither exists the defaults are used.
//!
//! ## Validation
//!
//! - Log level and format are normalized to lowercase and checked.
//! - `probe_interval_secs` must be non-zero and `runner` non-empty.
//! - A relative log file path is resolved against the application state directory.
//! - `paths.data_dir` defaults to the application data directory; relative
//!   `prefixes_dir` and `socket_path` values are resolved against it.

use std::fs;
use std::path::{Path, PathBuf};
use toml::Value;

use crate::config::CoreConfig;
use crate::error::{ConfigError, CoreError};
use crate::utils::fs as cellar_fs;
use crate::utils::paths::{get_app_config_dir, get_app_data_dir, get_app_state_dir, get_system_config_path};

/// Base directories that relative configuration paths are resolved against.
#[derive(Debug, Clone)]
struct BaseLocations {
    data_dir: PathBuf,
    state_dir: PathBuf,
}

impl BaseLocations {
    fn from_environment() -> Result<Self, CoreError> {
        Ok(Self {
            data_dir: get_app_data_dir()?,
            state_dir: get_app_state_dir()?,
        })
    }
}

/// Namespace for the configuration loading logic.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the system and user configuration files and validates the result.
    pub fn load() -> Result<CoreConfig, CoreError> {
        let user_config_path = get_app_config_dir()?.join("config.toml");
        Self::load_from(&user_config_path)
    }

    /// Like [`Self::load`], but reads the user layer from `user_config_path`.
    ///
    /// Used for the `--config` command-line override.
    pub fn load_from(user_config_path: &Path) -> Result<CoreConfig, CoreError> {
        let system_config_path = get_system_config_path();
        let locations = BaseLocations::from_environment()?;
        Self::load_layers(&system_config_path, user_config_path, &locations)
    }

    fn load_layers(
        system_config_path: &Path,
        user_config_path: &Path,
        locations: &BaseLocations,
    ) -> Result<CoreConfig, CoreError> {
        let system_toml_value = Self::read_toml_value(system_config_path)?;
        let user_toml_value = Self::read_toml_value(user_config_path)?;

        let merged_toml = Self::merge_toml_values(system_toml_value, user_toml_value);

        let mut final_config: CoreConfig = match merged_toml {
            Some(value) => value.try_into().map_err(ConfigError::ParseError)?,
            None => CoreConfig::default(),
        };

        Self::validate_config(&mut final_config, locations)?;
        Ok(final_config)
    }

    /// Reads and parses a TOML file. Missing and blank files yield `None`.
    fn read_toml_value(path: &Path) -> Result<Option<Value>, CoreError> {
        match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content.parse::<Value>().map_err(ConfigError::ParseError)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Config(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            })),
        }
    }

    /// Merges two optional TOML values. `override_val` takes precedence.
    fn merge_toml_values(base: Option<Value>, override_val: Option<Value>) -> Option<Value> {
        match (base, override_val) {
            (None, None) => None,
            (Some(b), None) => Some(b),
            (None, Some(o)) => Some(o),
            (Some(Value::Table(mut base_table)), Some(Value::Table(override_table))) => {
                Self::merge_toml_tables(&mut base_table, &override_table);
                Some(Value::Table(base_table))
            }
            (_, Some(o)) => Some(o),
        }
    }

    /// Recursively merges `override_table` into `base_table`.
    fn merge_toml_tables(base_table: &mut toml::map::Map<String, Value>, override_table: &toml::map::Map<String, Value>) {
        for (key, override_item) in override_table {
            match base_table.get_mut(key) {
                Some(base_item) => {
                    if let (Value::Table(bt), Value::Table(ot)) = (&mut *base_item, override_item) {
                        Self::merge_toml_tables(bt, ot);
                    } else {
                        *base_item = override_item.clone();
                    }
                }
                None => {
                    base_table.insert(key.clone(), override_item.clone());
                }
            }
        }
    }

    fn validate_config(config: &mut CoreConfig, locations: &BaseLocations) -> Result<(), CoreError> {
        let level_lower = config.logging.level.to_lowercase();
        match level_lower.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {
                config.logging.level = level_lower;
            }
            _ => {
                return Err(CoreError::Config(ConfigError::ValidationError(format!(
                    "Invalid log level: '{}'. Must be one of trace, debug, info, warn, error.",
                    config.logging.level
                ))));
            }
        }

        let format_lower = config.logging.format.to_lowercase();
        match format_lower.as_str() {
            "text" | "json" => {
                config.logging.format = format_lower;
            }
            _ => {
                return Err(CoreError::Config(ConfigError::ValidationError(format!(
                    "Invalid log format: '{}'. Must be one of text, json.",
                    config.logging.format
                ))));
            }
        }

        if let Some(log_path) = &config.logging.file_path {
            let absolute_path = if log_path.is_absolute() {
                log_path.clone()
            } else {
                locations.state_dir.join(log_path)
            };
            if let Some(parent_dir) = absolute_path.parent() {
                if !parent_dir.exists() {
                    cellar_fs::ensure_dir_exists(parent_dir)?;
                }
            }
            config.logging.file_path = Some(absolute_path);
        }

        if config.supervisor.runner.trim().is_empty() {
            return Err(CoreError::Config(ConfigError::ValidationError(
                "supervisor.runner must not be empty".to_string(),
            )));
        }
        if config.supervisor.probe_interval_secs == 0 {
            return Err(CoreError::Config(ConfigError::ValidationError(
                "supervisor.probe_interval_secs must be greater than zero".to_string(),
            )));
        }

        let data_dir = config
            .paths
            .data_dir
            .clone()
            .unwrap_or_else(|| locations.data_dir.clone());
        if !config.paths.prefixes_dir.is_absolute() {
            config.paths.prefixes_dir = data_dir.join(&config.paths.prefixes_dir);
        }
        if !config.paths.socket_path.is_absolute() {
            config.paths.socket_path = data_dir.join(&config.paths.socket_path);
        }
        config.paths.data_dir = Some(data_dir);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _root: TempDir,
        system: PathBuf,
        user: PathBuf,
        locations: BaseLocations,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let system = root.path().join("etc/config.toml");
        let user = root.path().join("home/config.toml");
        fs::create_dir_all(system.parent().unwrap()).unwrap();
        fs::create_dir_all(user.parent().unwrap()).unwrap();
        let locations = BaseLocations {
            data_dir: root.path().join("data"),
            state_dir: root.path().join("state"),
        };
        Fixture {
            _root: root,
            system,
            user,
            locations,
        }
    }

    fn load(f: &Fixture) -> Result<CoreConfig, CoreError> {
        ConfigLoader::load_layers(&f.system, &f.user, &f.locations)
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let f = fixture();
        let config = load(&f).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.supervisor.runner, "wine");
        assert_eq!(config.paths.data_dir, Some(f.locations.data_dir.clone()));
        assert_eq!(config.paths.prefixes_dir, f.locations.data_dir.join("Prefixes"));
        assert_eq!(config.paths.socket_path, f.locations.data_dir.join("cellar.sock"));
    }

    #[test]
    fn test_blank_user_file_is_ignored() {
        let f = fixture();
        fs::write(&f.user, "   \n").unwrap();
        let config = load(&f).unwrap();
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_user_values_override_system_values() {
        let f = fixture();
        fs::write(
            &f.system,
            "[supervisor]\nrunner = \"wine64\"\nprobe_interval_secs = 7\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();
        fs::write(&f.user, "[supervisor]\nprobe_interval_secs = 2\n").unwrap();
        let config = load(&f).unwrap();
        assert_eq!(config.supervisor.runner, "wine64");
        assert_eq!(config.supervisor.probe_interval_secs, 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_level_and_format_are_normalized() {
        let f = fixture();
        fs::write(&f.user, "[logging]\nlevel = \"WARN\"\nformat = \"JSON\"\n").unwrap();
        let config = load(&f).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let f = fixture();
        fs::write(&f.user, "[logging]\nlevel = \"loud\"\n").unwrap();
        match load(&f) {
            Err(CoreError::Config(ConfigError::ValidationError(msg))) => assert!(msg.contains("loud")),
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_probe_interval_is_rejected() {
        let f = fixture();
        fs::write(&f.user, "[supervisor]\nprobe_interval_secs = 0\n").unwrap();
        assert!(matches!(
            load(&f),
            Err(CoreError::Config(ConfigError::ValidationError(_)))
        ));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let f = fixture();
        fs::write(&f.user, "[logging\nlevel = ").unwrap();
        assert!(matches!(load(&f), Err(CoreError::Config(ConfigError::ParseError(_)))));
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let f = fixture();
        fs::write(&f.user, "[supervisor]\nnice_level = 3\n").unwrap();
        assert!(matches!(load(&f), Err(CoreError::Config(ConfigError::ParseError(_)))));
    }

    #[test]
    fn test_relative_log_path_resolves_under_state_dir() {
        let f = fixture();
        fs::write(&f.user, "[logging]\nfile_path = \"logs/cellar.log\"\n").unwrap();
        let config = load(&f).unwrap();
        let expected = f.locations.state_dir.join("logs/cellar.log");
        assert_eq!(config.logging.file_path, Some(expected.clone()));
        assert!(expected.parent().unwrap().is_dir());
    }

    #[test]
    fn test_explicit_data_dir_anchors_relative_paths() {
        let f = fixture();
        let custom = f.locations.data_dir.with_file_name("custom");
        fs::write(
            &f.user,
            format!(
                "[paths]\ndata_dir = \"{}\"\nsocket_path = \"/run/cellar.sock\"\n",
                custom.display()
            ),
        )
        .unwrap();
        let config = load(&f).unwrap();
        assert_eq!(config.paths.prefixes_dir, custom.join("Prefixes"));
        assert_eq!(config.paths.socket_path, PathBuf::from("/run/cellar.sock"));
    }

    #[test]
    fn test_merge_toml_values_nested() {
        let base: Value = "a = 1\n[t]\nx = 1\ny = 2\n".parse().unwrap();
        let over: Value = "[t]\ny = 3\nz = 4\n".parse().unwrap();
        let merged = ConfigLoader::merge_toml_values(Some(base), Some(over)).unwrap();
        let t = merged.get("t").unwrap();
        assert_eq!(merged.get("a").and_then(Value::as_integer), Some(1));
        assert_eq!(t.get("x").and_then(Value::as_integer), Some(1));
        assert_eq!(t.get("y").and_then(Value::as_integer), Some(3));
        assert_eq!(t.get("z").and_then(Value::as_integer), Some(4));
    }
}
