//! Application descriptors.
//!
//! A descriptor ties a Windows executable to the isolated environment
//! ("prefix") it runs in. Descriptors are small TOML files with the `.charm`
//! extension living inside the prefixes directory; [`DescriptorStore`] reads
//! and writes them.

pub mod shortcuts;
mod store;

pub use shortcuts::ShortcutLedger;
pub use store::{DescriptorStore, DESCRIPTOR_EXTENSION};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Number of leading executable-name characters used to recognise a running
/// application in the process table.
///
/// The kernel truncates process names to 15 bytes, so the prefix is also what
/// `pgrep` without `-f` can match. Any unrelated process whose command line
/// contains the same 15 characters is a false positive.
pub const PROBE_PREFIX_LEN: usize = 15;

/// Stable identity of a descriptor: `"{stem}-{hash10}"`.
///
/// `stem` is the executable's file stem with spaces replaced by `_`,
/// `hash10` the first ten hex characters of its SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorId(String);

impl DescriptorId {
    /// Wraps an already-derived identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the identifier of `executable` whose content hashes to `content_hash`.
    ///
    /// ```
    /// use cellar_core::descriptor::DescriptorId;
    /// use std::path::Path;
    ///
    /// let id = DescriptorId::derive(Path::new("/games/My Game.exe"), "0123456789abcdef");
    /// assert_eq!(id.as_str(), "My_Game-0123456789");
    /// ```
    pub fn derive(executable: &Path, content_hash: &str) -> Self {
        let stem = executable
            .file_stem()
            .map(|s| s.to_string_lossy().replace(' ', "_"))
            .unwrap_or_default();
        let hash10: String = content_hash.chars().take(10).collect();
        Self(format!("{}-{}", stem, hash10))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DescriptorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A loaded application descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    pub id: DescriptorId,
    pub executable_path: PathBuf,
    /// Isolated environment the executable runs in. Descriptors sharing a
    /// prefix form a shared-environment group.
    pub prefix_path: PathBuf,
    pub display_name: String,
    /// Free-text arguments, split with shell quoting rules at launch.
    pub launch_arguments: String,
    /// Lowercase hex SHA-256 of the executable.
    pub content_hash: String,
    /// The `.charm` file this descriptor was loaded from.
    pub source: PathBuf,
}

impl AppDescriptor {
    /// The executable's file name, e.g. `setup.exe`.
    pub fn executable_name(&self) -> String {
        self.executable_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The first [`PROBE_PREFIX_LEN`] characters of the executable's stem.
    pub fn probe_prefix(&self) -> String {
        self.executable_path
            .file_stem()
            .map(|s| s.to_string_lossy().chars().take(PROBE_PREFIX_LEN).collect())
            .unwrap_or_default()
    }

    /// Whether this descriptor runs in `prefix`.
    pub fn shares_prefix(&self, prefix: &Path) -> bool {
        self.prefix_path == prefix
    }
}
