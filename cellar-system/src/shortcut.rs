//! Importing the shortcuts an installer leaves in its environment.
//!
//! After an application exits, the `.lnk` files below its environment's
//! `drive_c` are resolved to executables in the same environment and turned
//! into descriptors. Everything here blocks.

use crate::error::ShortcutError;
use cellar_core::descriptor::shortcuts::{find_in_drive, find_shortcuts};
use cellar_core::descriptor::{AppDescriptor, DescriptorStore, ShortcutLedger};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

static TARGET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Target File DOS Name\s*:\s*(.*?)\s*$").expect("static regex is valid"));

/// Reads the target of a Windows shortcut.
pub trait ShortcutReader: Send + Sync {
    /// File name of the executable `shortcut` points at, if it names one.
    fn target_name(&self, shortcut: &Path) -> Result<Option<String>, ShortcutError>;
}

/// [`ShortcutReader`] backed by `exiftool`.
#[derive(Debug, Clone, Default)]
pub struct ExiftoolShortcutReader;

impl ShortcutReader for ExiftoolShortcutReader {
    fn target_name(&self, shortcut: &Path) -> Result<Option<String>, ShortcutError> {
        let failed = |reason: String| ShortcutError::ReaderFailed {
            command: "exiftool".to_string(),
            path: shortcut.to_path_buf(),
            reason,
        };
        let output = Command::new("exiftool")
            .arg(shortcut)
            .output()
            .map_err(|e| failed(e.to_string()))?;
        if !output.status.success() {
            return Err(failed(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_target_name(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extracts the `Target File DOS Name` field from `exiftool` output.
pub fn parse_target_name(output: &str) -> Option<String> {
    TARGET_NAME
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
        .filter(|name| !name.is_empty())
}

fn is_uninstaller(executable: &Path) -> bool {
    executable
        .file_stem()
        .map_or(false, |stem| stem.to_string_lossy().to_lowercase().contains("unins"))
}

/// Creates descriptors for the shortcuts in `prefix` not imported before.
///
/// Returns the descriptors created or found for new shortcuts. A shortcut is
/// recorded once its target has been located, so uninstaller shortcuts are
/// skipped for good while unresolved ones are retried on the next pass.
pub fn import_shortcuts(store: &DescriptorStore, reader: &dyn ShortcutReader, prefix: &Path) -> Vec<AppDescriptor> {
    let shortcuts = find_shortcuts(prefix);
    if shortcuts.is_empty() {
        return Vec::new();
    }
    let mut ledger = match ShortcutLedger::load(prefix) {
        Ok(ledger) => ledger,
        Err(e) => {
            warn!(prefix = %prefix.display(), "Cannot read shortcut ledger: {}", e);
            return Vec::new();
        }
    };

    let mut imported: Vec<AppDescriptor> = Vec::new();
    let mut recorded = false;
    for shortcut in shortcuts.iter() {
        if ledger.contains(shortcut) {
            continue;
        }
        let name = match reader.target_name(shortcut) {
            Ok(Some(name)) => name,
            Ok(None) => {
                debug!(shortcut = %shortcut.display(), "Shortcut names no target");
                continue;
            }
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        let Some(executable) = find_in_drive(prefix, &name) else {
            debug!(shortcut = %shortcut.display(), target = %name, "Shortcut target not in environment");
            continue;
        };
        if is_uninstaller(&executable) {
            debug!(shortcut = %shortcut.display(), "Skipping uninstaller shortcut");
            recorded |= ledger.record(shortcut);
            continue;
        }
        match store.create_in_prefix(&executable, prefix) {
            Ok(descriptor) => {
                info!(descriptor = %descriptor.id, shortcut = %shortcut.display(), "Imported shortcut");
                recorded |= ledger.record(shortcut);
                if !imported.iter().any(|seen| seen.id == descriptor.id) {
                    imported.push(descriptor);
                }
            }
            Err(e) => warn!(shortcut = %shortcut.display(), "Cannot create descriptor: {}", e),
        }
    }

    if recorded {
        if let Err(e) = ledger.save() {
            warn!(prefix = %prefix.display(), "Cannot save shortcut ledger: {}", e);
        }
    }
    imported
}
