//! XDG Base Directory and Application-Specific Path Resolution.
//!
//! This module resolves the standard directories Cellar uses, relying on the
//! `directories-next` crate, and provides the `~`-relative path helpers used
//! by descriptor files.
//!
//! All resolvers return `Result<PathBuf, CoreError>`, yielding
//! [`CoreError::Config(ConfigError::DirectoryUnavailable)`] if a directory
//! cannot be determined (e.g., when the HOME directory is not found).

use crate::error::{ConfigError, CoreError};
use directories_next::{BaseDirs, ProjectDirs};
use std::path::{Path, PathBuf};

const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "Cellar";
const APPLICATION: &str = "Cellar";

/// Default location of the machine-wide configuration file.
const SYSTEM_CONFIG_PATH: &str = "/etc/cellar/config.toml";

/// Environment variable overriding [`SYSTEM_CONFIG_PATH`].
pub const SYSTEM_CONFIG_ENV: &str = "CELLAR_SYSTEM_CONFIG";

/// Returns the application-specific configuration directory, e.g. `~/.config/Cellar`.
pub fn get_app_config_dir() -> Result<PathBuf, CoreError> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| {
            CoreError::Config(ConfigError::DirectoryUnavailable {
                dir_type: "App Config".to_string(),
            })
        })
}

/// Returns the application-specific data directory, e.g. `~/.local/share/Cellar`.
///
/// Prefixes and the rendezvous socket live here unless configured otherwise.
pub fn get_app_data_dir() -> Result<PathBuf, CoreError> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| {
            CoreError::Config(ConfigError::DirectoryUnavailable {
                dir_type: "App Data".to_string(),
            })
        })
}

/// Returns the base directory for user-specific state files.
///
/// On Linux this is `$XDG_STATE_HOME`, falling back to `$HOME/.local/state`.
/// Other platforms use the local data directory.
pub fn get_state_base_dir() -> Result<PathBuf, CoreError> {
    BaseDirs::new()
        .map(|dirs| {
            #[cfg(target_os = "linux")]
            {
                match std::env::var("XDG_STATE_HOME") {
                    Ok(state_home) if !state_home.is_empty() => PathBuf::from(state_home),
                    _ => dirs.home_dir().join(".local/state"),
                }
            }
            #[cfg(not(target_os = "linux"))]
            {
                dirs.data_local_dir().to_path_buf()
            }
        })
        .ok_or_else(|| {
            CoreError::Config(ConfigError::DirectoryUnavailable {
                dir_type: "State Base".to_string(),
            })
        })
}

/// Returns the application-specific state directory, e.g. `~/.local/state/Cellar`.
pub fn get_app_state_dir() -> Result<PathBuf, CoreError> {
    get_state_base_dir().map(|base_state| base_state.join(APPLICATION))
}

/// Returns the system configuration path, honouring [`SYSTEM_CONFIG_ENV`].
pub fn get_system_config_path() -> PathBuf {
    match std::env::var(SYSTEM_CONFIG_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(SYSTEM_CONFIG_PATH),
    }
}

/// Returns the current user's home directory, if it can be determined.
pub fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Expands a leading `~` against `home`.
///
/// ```
/// use cellar_core::utils::paths::expand_home;
/// use std::path::{Path, PathBuf};
///
/// let home = Path::new("/home/u");
/// assert_eq!(expand_home("~/Games/a.exe", Some(home)), PathBuf::from("/home/u/Games/a.exe"));
/// assert_eq!(expand_home("/opt/a.exe", Some(home)), PathBuf::from("/opt/a.exe"));
/// ```
pub fn expand_home(raw: &str, home: Option<&Path>) -> PathBuf {
    match (raw.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(raw),
    }
}

/// Rewrites a path under `home` as `~/...`; other paths are returned unchanged.
pub fn contract_home(path: &Path, home: Option<&Path>) -> String {
    if let Some(home) = home {
        if let Ok(rest) = path.strip_prefix(home) {
            if rest.as_os_str().is_empty() {
                return "~".to_string();
            }
            return format!("~/{}", rest.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_is_valid_path(res: Result<PathBuf, CoreError>, dir_type: &str) {
        match res {
            Ok(path) => {
                assert!(path.is_absolute(), "Path for {} is not absolute: {:?}", dir_type, path);
            }
            // HOME may be unset on CI.
            Err(CoreError::Config(ConfigError::DirectoryUnavailable { .. })) => {}
            Err(e) => panic!("Expected Ok or DirectoryUnavailable for {}, got {:?}", dir_type, e),
        }
    }

    #[test]
    fn test_get_app_config_dir() {
        assert_is_valid_path(get_app_config_dir(), "App Config");
    }

    #[test]
    fn test_get_app_data_dir() {
        assert_is_valid_path(get_app_data_dir(), "App Data");
    }

    #[test]
    fn test_get_app_state_dir() {
        assert_is_valid_path(get_app_state_dir(), "App State");
    }

    #[test]
    fn test_expand_home_variants() {
        let home = Path::new("/home/u");
        assert_eq!(expand_home("~", Some(home)), PathBuf::from("/home/u"));
        assert_eq!(expand_home("~/a/b", Some(home)), PathBuf::from("/home/u/a/b"));
        assert_eq!(expand_home("~other/a", Some(home)), PathBuf::from("~other/a"));
        assert_eq!(expand_home("~/a", None), PathBuf::from("~/a"));
    }

    #[test]
    fn test_contract_home_round_trips_with_expand() {
        let home = Path::new("/home/u");
        let original = Path::new("/home/u/Prefixes/app-0123456789/drive_c/app.exe");
        let contracted = contract_home(original, Some(home));
        assert_eq!(contracted, "~/Prefixes/app-0123456789/drive_c/app.exe");
        assert_eq!(expand_home(&contracted, Some(home)), original);
    }

    #[test]
    fn test_contract_home_leaves_foreign_paths() {
        let home = Path::new("/home/u");
        assert_eq!(contract_home(Path::new("/opt/x.exe"), Some(home)), "/opt/x.exe");
        assert_eq!(contract_home(Path::new("/home/u"), Some(home)), "~");
    }
}
