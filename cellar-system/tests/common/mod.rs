#![allow(dead_code)]

use cellar_core::descriptor::{AppDescriptor, DescriptorId, DescriptorStore};
use cellar_system::indicator::{IndicatorHandle, IndicatorIndex, Notifier, RunIndicator};
use cellar_system::process_table::ProcessTable;
use cellar_system::{
    owner_channel, ExiftoolShortcutReader, LaunchError, Launcher, OwnerEvent, Shell, ShellSettings, ShortcutReader,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::{fmt, EnvFilter};

pub const SIGNATURE: &str = "cellar-integration-signature";

pub fn init_tracing() {
    let _ = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cellar_system=debug".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

/// Every indicator transition, in order.
#[derive(Clone, Default)]
pub struct Transitions(Arc<Mutex<Vec<(DescriptorId, bool)>>>);

impl Transitions {
    pub fn last(&self, id: &DescriptorId) -> Option<bool> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(seen, _)| seen == id)
            .map(|(_, running)| *running)
    }

    pub fn of(&self, id: &DescriptorId) -> Vec<bool> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(seen, _)| seen == id)
            .map(|(_, running)| *running)
            .collect()
    }
}

struct RecordingIndicator {
    id: DescriptorId,
    transitions: Transitions,
}

impl RunIndicator for RecordingIndicator {
    fn show_running(&self) {
        self.transitions.0.lock().unwrap().push((self.id.clone(), true));
    }

    fn show_stopped(&self) {
        self.transitions.0.lock().unwrap().push((self.id.clone(), false));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    TargetMissing(DescriptorId),
    LaunchFailed(DescriptorId),
    CatalogChanged(DescriptorId),
    GroupRefreshed(PathBuf, Vec<DescriptorId>),
}

#[derive(Clone, Default)]
pub struct Notices(Arc<Mutex<Vec<Notice>>>);

impl Notices {
    pub fn all(&self) -> Vec<Notice> {
        self.0.lock().unwrap().clone()
    }
}

impl Notifier for Notices {
    fn target_missing(&self, descriptor: &AppDescriptor) {
        self.0.lock().unwrap().push(Notice::TargetMissing(descriptor.id.clone()));
    }

    fn launch_failed(&self, id: &DescriptorId, _error: &LaunchError) {
        self.0.lock().unwrap().push(Notice::LaunchFailed(id.clone()));
    }

    fn catalog_changed(&self, descriptor: &AppDescriptor) {
        self.0.lock().unwrap().push(Notice::CatalogChanged(descriptor.id.clone()));
    }

    fn group_refreshed(&self, prefix: &Path, running: &[DescriptorId]) {
        self.0
            .lock()
            .unwrap()
            .push(Notice::GroupRefreshed(prefix.to_path_buf(), running.to_vec()));
    }
}

/// A shell driven by hand, one event at a time.
pub struct Rig {
    pub dir: TempDir,
    pub store: DescriptorStore,
    pub shell: Shell,
    pub events: mpsc::UnboundedReceiver<OwnerEvent>,
    pub transitions: Transitions,
    pub notices: Notices,
}

impl Rig {
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self::with_shortcut_reader(table, Arc::new(ExiftoolShortcutReader))
    }

    pub fn with_shortcut_reader(table: Arc<dyn ProcessTable>, shortcuts: Arc<dyn ShortcutReader>) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::with_home(dir.path().join("Prefixes"), None);
        let transitions = Transitions::default();
        let factory_transitions = transitions.clone();
        let indicators = IndicatorIndex::new(move |descriptor| {
            Arc::new(RecordingIndicator {
                id: descriptor.id.clone(),
                transitions: factory_transitions.clone(),
            }) as IndicatorHandle
        });
        let notices = Notices::default();
        let (owner, events) = owner_channel();
        let shell = Shell::new(
            store.clone(),
            Launcher::new("sh"),
            table,
            indicators,
            Box::new(notices.clone()),
            owner,
            ShellSettings {
                self_signature: SIGNATURE.to_string(),
                settle_delay: Duration::from_millis(50),
                own_pid: std::process::id(),
            },
        )
        .with_shortcut_reader(shortcuts);
        Self {
            dir,
            store,
            shell,
            events,
            transitions,
            notices,
        }
    }

    /// Writes `script` as `name` and creates a descriptor for it.
    pub fn executable(&self, name: &str, script: &str) -> AppDescriptor {
        let exe = self.dir.path().join("games").join(name);
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, script).unwrap();
        self.store.create_for_executable(&exe).unwrap()
    }

    /// Adds a descriptor for `name` inside the environment of `host`.
    pub fn sibling(&self, host: &AppDescriptor, name: &str, script: &str) -> AppDescriptor {
        let exe = self.dir.path().join("games").join(name);
        fs::write(&exe, script).unwrap();
        let content_hash = cellar_core::utils::fs::sha256_file(&exe).unwrap();
        let stem = exe.file_stem().unwrap().to_string_lossy().into_owned();
        let descriptor = AppDescriptor {
            id: DescriptorId::derive(&exe, &content_hash),
            executable_path: exe,
            prefix_path: host.prefix_path.clone(),
            display_name: stem.clone(),
            launch_arguments: String::new(),
            content_hash,
            source: host.prefix_path.join(format!("{}.charm", stem)),
        };
        self.store.save(&descriptor).unwrap();
        descriptor
    }

    /// Handles events until one matching `done` has been handled.
    pub async fn pump_until(&mut self, done: impl Fn(&OwnerEvent) -> bool) {
        loop {
            let event = timeout(Duration::from_secs(10), self.events.recv())
                .await
                .expect("timed out waiting for owner event")
                .expect("owner channel closed");
            let finished = done(&event);
            let _ = self.shell.handle_event(event);
            if finished {
                return;
            }
        }
    }
}
