//! Shortcuts left behind in an environment by installers.
//!
//! Installers drop `.lnk` files somewhere below `<prefix>/drive_c`. A shortcut
//! that has been turned into a descriptor is recorded by file name in the
//! environment's [`SHORTCUT_LEDGER`], so it is imported only once.

use crate::error::DescriptorError;

use glob::MatchOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Ledger file name inside an environment.
pub const SHORTCUT_LEDGER: &str = "found_shortcuts.toml";

/// Directory of an environment holding the Windows file system.
pub const DRIVE_DIR: &str = "drive_c";

fn drive_pattern(prefix: &Path, file_pattern: &str) -> String {
    format!(
        "{}/{}/**/{}",
        glob::Pattern::escape(&prefix.to_string_lossy()),
        DRIVE_DIR,
        file_pattern
    )
}

fn matching_files(pattern: &str) -> Vec<PathBuf> {
    // Windows file names are case-insensitive.
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    match glob::glob_with(pattern, options) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|path| path.is_file()).collect(),
        Err(e) => {
            warn!(pattern, "Invalid shortcut pattern: {}", e);
            Vec::new()
        }
    }
}

/// Every `.lnk` file below `<prefix>/drive_c`, in path order.
pub fn find_shortcuts(prefix: &Path) -> Vec<PathBuf> {
    matching_files(&drive_pattern(prefix, "*.lnk"))
}

/// The first file below `<prefix>/drive_c` called `name`, ignoring case.
pub fn find_in_drive(prefix: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    matching_files(&drive_pattern(prefix, &glob::Pattern::escape(name)))
        .into_iter()
        .next()
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LedgerFile {
    #[serde(default)]
    shortcuts: Vec<String>,
}

/// Shortcut file names of one environment that were already imported.
#[derive(Debug, Clone)]
pub struct ShortcutLedger {
    path: PathBuf,
    names: Vec<String>,
}

impl ShortcutLedger {
    /// Reads the ledger of `prefix`. A missing ledger is empty.
    pub fn load(prefix: &Path) -> Result<Self, DescriptorError> {
        let path = prefix.join(SHORTCUT_LEDGER);
        let names = match fs::read_to_string(&path) {
            Ok(content) => {
                let file: LedgerFile = toml::from_str(&content).map_err(|e| DescriptorError::Malformed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                file.shortcuts
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(DescriptorError::Io { path, source }),
        };
        Ok(Self { path, names })
    }

    pub fn contains(&self, shortcut: &Path) -> bool {
        file_name(shortcut).map_or(false, |name| self.names.iter().any(|seen| seen == &name))
    }

    /// Remembers `shortcut`. Returns `false` if it was already recorded.
    pub fn record(&mut self, shortcut: &Path) -> bool {
        match file_name(shortcut) {
            Some(name) if !self.names.contains(&name) => {
                self.names.push(name);
                true
            }
            _ => false,
        }
    }

    pub fn save(&self) -> Result<(), DescriptorError> {
        let file = LedgerFile {
            shortcuts: self.names.clone(),
        };
        let encoded = toml::to_string_pretty(&file).map_err(|e| DescriptorError::Malformed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&self.path, encoded).map_err(|source| DescriptorError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}
