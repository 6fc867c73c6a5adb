use super::{AppDescriptor, DescriptorId};
use crate::error::DescriptorError;
use crate::utils::fs::sha256_file;
use crate::utils::paths::{contract_home, expand_home, home_dir};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// File extension of descriptor files.
pub const DESCRIPTOR_EXTENSION: &str = "charm";

/// On-disk layout of a `.charm` file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorFile {
    executable_path: String,
    isolated_environment_path: String,
    display_name: String,
    #[serde(default)]
    launch_arguments: String,
    content_hash: String,
}

/// Reads and writes descriptors below the prefixes directory.
///
/// Every call goes back to disk; nothing is cached.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    prefixes_dir: PathBuf,
    home: Option<PathBuf>,
}

impl DescriptorStore {
    pub fn new(prefixes_dir: impl Into<PathBuf>) -> Self {
        Self::with_home(prefixes_dir, home_dir())
    }

    /// Uses `home` instead of the current user's home for `~` expansion.
    pub fn with_home(prefixes_dir: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            prefixes_dir: prefixes_dir.into(),
            home,
        }
    }

    pub fn prefixes_dir(&self) -> &Path {
        &self.prefixes_dir
    }

    /// Lists descriptor files directly inside the prefixes directory or one
    /// level below it, most recently modified first.
    pub fn discover(&self) -> Vec<PathBuf> {
        let base = glob::Pattern::escape(&self.prefixes_dir.to_string_lossy());
        let patterns = [
            format!("{}/*.{}", base, DESCRIPTOR_EXTENSION),
            format!("{}/*/*.{}", base, DESCRIPTOR_EXTENSION),
        ];

        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for pattern in &patterns {
            let paths = match glob::glob(pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(pattern = %pattern, "Invalid descriptor discovery pattern: {}", e);
                    continue;
                }
            };
            for entry in paths {
                match entry {
                    Ok(path) if path.is_file() => {
                        let modified = fs::metadata(&path)
                            .and_then(|m| m.modified())
                            .unwrap_or(SystemTime::UNIX_EPOCH);
                        found.push((modified, path));
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Skipping unreadable descriptor candidate: {}", e),
                }
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        found.into_iter().map(|(_, path)| path).collect()
    }

    /// Loads one descriptor file.
    pub fn load(&self, path: &Path) -> Result<AppDescriptor, DescriptorError> {
        let content = fs::read_to_string(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: DescriptorFile = toml::from_str(&content).map_err(|e| DescriptorError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if file.executable_path.trim().is_empty() {
            return Err(DescriptorError::Malformed {
                path: path.to_path_buf(),
                reason: "executable_path is empty".to_string(),
            });
        }

        let home = self.home.as_deref();
        let executable_path = expand_home(&file.executable_path, home);
        Ok(AppDescriptor {
            id: DescriptorId::derive(&executable_path, &file.content_hash),
            executable_path,
            prefix_path: expand_home(&file.isolated_environment_path, home),
            display_name: file.display_name,
            launch_arguments: file.launch_arguments,
            content_hash: file.content_hash,
            source: path.to_path_buf(),
        })
    }

    /// Loads every discoverable descriptor, skipping (and logging) broken ones.
    pub fn load_all(&self) -> Vec<AppDescriptor> {
        self.discover()
            .into_iter()
            .filter_map(|path| match self.load(&path) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    warn!(path = %path.display(), "Skipping descriptor: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn find(&self, id: &DescriptorId) -> Result<AppDescriptor, DescriptorError> {
        self.load_all()
            .into_iter()
            .find(|d| &d.id == id)
            .ok_or_else(|| DescriptorError::NotFound { id: id.to_string() })
    }

    /// All descriptors whose environment is `prefix`.
    pub fn in_prefix(&self, prefix: &Path) -> Vec<AppDescriptor> {
        self.load_all().into_iter().filter(|d| d.shares_prefix(prefix)).collect()
    }

    /// Writes `descriptor` back to its source file.
    pub fn save(&self, descriptor: &AppDescriptor) -> Result<(), DescriptorError> {
        let home = self.home.as_deref();
        let file = DescriptorFile {
            executable_path: contract_home(&descriptor.executable_path, home),
            isolated_environment_path: contract_home(&descriptor.prefix_path, home),
            display_name: descriptor.display_name.clone(),
            launch_arguments: descriptor.launch_arguments.clone(),
            content_hash: descriptor.content_hash.clone(),
        };
        let encoded = toml::to_string_pretty(&file).map_err(|e| DescriptorError::Malformed {
            path: descriptor.source.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&descriptor.source, encoded).map_err(|source| DescriptorError::Io {
            path: descriptor.source.clone(),
            source,
        })
    }

    pub fn set_launch_arguments(&self, id: &DescriptorId, arguments: &str) -> Result<AppDescriptor, DescriptorError> {
        let mut descriptor = self.find(id)?;
        descriptor.launch_arguments = arguments.trim().to_string();
        self.save(&descriptor)?;
        Ok(descriptor)
    }

    /// Points descriptor `id` at `new_path` if the file there is the same executable.
    ///
    /// The returned descriptor's id is re-derived from the new file name.
    pub fn relocate_executable(&self, id: &DescriptorId, new_path: &Path) -> Result<AppDescriptor, DescriptorError> {
        let mut descriptor = self.find(id)?;
        let actual = hash_executable(new_path)?;
        if actual != descriptor.content_hash {
            return Err(DescriptorError::HashMismatch {
                path: new_path.to_path_buf(),
                expected: descriptor.content_hash,
                actual,
            });
        }
        descriptor.executable_path = new_path.to_path_buf();
        descriptor.id = DescriptorId::derive(new_path, &descriptor.content_hash);
        self.save(&descriptor)?;
        Ok(descriptor)
    }

    /// Creates (or returns the existing) descriptor for `executable`.
    ///
    /// The prefix is `<prefixes_dir>/<id>` and the descriptor file is
    /// `<prefix>/<display name>.charm`.
    pub fn create_for_executable(&self, executable: &Path) -> Result<AppDescriptor, DescriptorError> {
        let content_hash = hash_executable(executable)?;
        let id = DescriptorId::derive(executable, &content_hash);
        let prefix_path = self.prefixes_dir.join(id.as_str());
        self.create(executable, id, content_hash, prefix_path)
    }

    /// Creates (or returns the existing) descriptor for `executable` running
    /// in the existing environment `prefix`.
    pub fn create_in_prefix(&self, executable: &Path, prefix: &Path) -> Result<AppDescriptor, DescriptorError> {
        let content_hash = hash_executable(executable)?;
        let id = DescriptorId::derive(executable, &content_hash);
        self.create(executable, id, content_hash, prefix.to_path_buf())
    }

    fn create(
        &self,
        executable: &Path,
        id: DescriptorId,
        content_hash: String,
        prefix_path: PathBuf,
    ) -> Result<AppDescriptor, DescriptorError> {
        let display_name = executable
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());
        let mut source = prefix_path.join(format!("{}.{}", display_name, DESCRIPTOR_EXTENSION));

        if source.is_file() {
            let existing = self.load(&source)?;
            if existing.id == id {
                debug!(descriptor = %id, "Descriptor already exists");
                return Ok(existing);
            }
            // Same file name, different executable.
            source = prefix_path.join(format!("{}.{}", id, DESCRIPTOR_EXTENSION));
            if source.is_file() {
                return self.load(&source);
            }
        }

        fs::create_dir_all(&prefix_path).map_err(|source| DescriptorError::Io {
            path: prefix_path.clone(),
            source,
        })?;
        let descriptor = AppDescriptor {
            id,
            executable_path: executable.to_path_buf(),
            prefix_path,
            display_name,
            launch_arguments: String::new(),
            content_hash,
            source,
        };
        self.save(&descriptor)?;
        Ok(descriptor)
    }
}

fn hash_executable(executable: &Path) -> Result<String, DescriptorError> {
    sha256_file(executable).map_err(|source| DescriptorError::Io {
        path: executable.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        root: TempDir,
        store: DescriptorStore,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let prefixes = root.path().join("Prefixes");
        fs::create_dir_all(&prefixes).unwrap();
        let store = DescriptorStore::with_home(&prefixes, Some(root.path().to_path_buf()));
        Fixture { root, store }
    }

    fn write_exe(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_create_for_executable_layout() {
        let f = fixture();
        let exe = write_exe(&f.root.path().join("games"), "My Game.exe", b"abc");
        let d = f.store.create_for_executable(&exe).unwrap();

        assert_eq!(d.id.as_str(), "My_Game-ba7816bf8f");
        assert_eq!(d.prefix_path, f.store.prefixes_dir().join("My_Game-ba7816bf8f"));
        assert_eq!(d.source, d.prefix_path.join("My Game.charm"));
        assert!(d.prefix_path.is_dir());

        let raw = fs::read_to_string(&d.source).unwrap();
        assert!(raw.contains("executable_path = \"~/games/My Game.exe\""), "{}", raw);
        assert!(raw.contains("isolated_environment_path = \"~/Prefixes/My_Game-ba7816bf8f\""));
    }

    #[test]
    fn test_create_for_executable_is_idempotent() {
        let f = fixture();
        let exe = write_exe(&f.root.path().join("games"), "app.exe", b"payload");
        let first = f.store.create_for_executable(&exe).unwrap();
        f.store.set_launch_arguments(&first.id, "-windowed").unwrap();
        let second = f.store.create_for_executable(&exe).unwrap();
        assert_eq!(second.launch_arguments, "-windowed");
        assert_eq!(f.store.discover().len(), 1);
    }

    #[test]
    fn test_load_round_trips_and_expands_home() {
        let f = fixture();
        let exe = write_exe(&f.root.path().join("games"), "app.exe", b"x");
        let created = f.store.create_for_executable(&exe).unwrap();
        let loaded = f.store.load(&created.source).unwrap();
        assert_eq!(loaded, created);
    }

    #[test]
    fn test_load_malformed_file() {
        let f = fixture();
        let path = f.store.prefixes_dir().join("broken.charm");
        fs::write(&path, "executable_path = [").unwrap();
        assert!(matches!(f.store.load(&path), Err(DescriptorError::Malformed { .. })));
    }

    #[test]
    fn test_load_all_skips_broken_descriptors() {
        let f = fixture();
        let exe = write_exe(&f.root.path().join("games"), "good.exe", b"good");
        f.store.create_for_executable(&exe).unwrap();
        fs::write(f.store.prefixes_dir().join("bad.charm"), "display_name = 1").unwrap();

        let all = f.store.load_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].display_name, "good");
    }

    #[test]
    fn test_discover_depth_and_order() {
        let f = fixture();
        let prefixes = f.store.prefixes_dir().to_path_buf();
        let deep = prefixes.join("a/b");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("too_deep.charm"), "").unwrap();
        fs::write(prefixes.join("top.charm"), "").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(prefixes.join("a/newer.charm"), "").unwrap();
        fs::write(prefixes.join("a/ignored.txt"), "").unwrap();

        let names: Vec<String> = f
            .store
            .discover()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["newer.charm".to_string(), "top.charm".to_string()]);
    }

    #[test]
    fn test_find_unknown_id() {
        let f = fixture();
        match f.store.find(&DescriptorId::from("nope-0000000000")) {
            Err(DescriptorError::NotFound { id }) => assert_eq!(id, "nope-0000000000"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_in_prefix_groups_by_environment() {
        let f = fixture();
        let exe = write_exe(&f.root.path().join("games"), "setup.exe", b"setup");
        let setup = f.store.create_for_executable(&exe).unwrap();

        let sibling_exe = write_exe(&setup.prefix_path.join("drive_c/Game"), "game.exe", b"game");
        let sibling = AppDescriptor {
            id: DescriptorId::derive(&sibling_exe, "00aa"),
            executable_path: sibling_exe,
            prefix_path: setup.prefix_path.clone(),
            display_name: "game".to_string(),
            launch_arguments: String::new(),
            content_hash: "00aa".to_string(),
            source: setup.prefix_path.join("game.charm"),
        };
        f.store.save(&sibling).unwrap();

        let other = write_exe(&f.root.path().join("games"), "other.exe", b"other");
        f.store.create_for_executable(&other).unwrap();

        let mut group: Vec<String> = f
            .store
            .in_prefix(&setup.prefix_path)
            .into_iter()
            .map(|d| d.display_name)
            .collect();
        group.sort();
        assert_eq!(group, vec!["game".to_string(), "setup".to_string()]);
    }

    #[test]
    fn test_create_in_prefix_joins_existing_environment() {
        let f = fixture();
        let setup = write_exe(&f.root.path().join("games"), "setup.exe", b"setup");
        let host = f.store.create_for_executable(&setup).unwrap();
        let game = write_exe(&host.prefix_path.join("drive_c/Game"), "setup.exe", b"game");

        let joined = f.store.create_in_prefix(&game, &host.prefix_path).unwrap();
        assert_eq!(joined.prefix_path, host.prefix_path);
        assert_ne!(joined.id, host.id);
        assert_eq!(joined.source, host.prefix_path.join(format!("{}.charm", joined.id)));
        assert_eq!(f.store.in_prefix(&host.prefix_path).len(), 2);

        let again = f.store.create_in_prefix(&game, &host.prefix_path).unwrap();
        assert_eq!(again, joined);
        assert_eq!(f.store.discover().len(), 2);
    }

    #[test]
    fn test_relocate_executable_accepts_identical_file() {
        let f = fixture();
        let exe = write_exe(&f.root.path().join("old"), "app.exe", b"same bytes");
        let d = f.store.create_for_executable(&exe).unwrap();
        let moved = write_exe(&f.root.path().join("new"), "app.exe", b"same bytes");
        fs::remove_file(&exe).unwrap();

        let relocated = f.store.relocate_executable(&d.id, &moved).unwrap();
        assert_eq!(relocated.executable_path, moved);
        assert_eq!(relocated.id, d.id);
        assert_eq!(f.store.find(&d.id).unwrap().executable_path, moved);
    }

    #[test]
    fn test_relocate_executable_rejects_different_file() {
        let f = fixture();
        let exe = write_exe(&f.root.path().join("old"), "app.exe", b"original");
        let d = f.store.create_for_executable(&exe).unwrap();
        let impostor = write_exe(&f.root.path().join("new"), "app.exe", b"impostor");

        match f.store.relocate_executable(&d.id, &impostor) {
            Err(DescriptorError::HashMismatch { expected, .. }) => assert_eq!(expected, d.content_hash),
            other => panic!("Expected HashMismatch, got {:?}", other),
        }
        assert_eq!(f.store.find(&d.id).unwrap().executable_path, exe);
    }
}
