//! The owner loop.
//!
//! [`Shell`] owns the process registry and the indicator index. Every
//! mutation of either happens inside [`Shell::handle_event`], driven by
//! [`OwnerEvent`]s drained from a single queue. Background tasks (prober,
//! gateway, waiters, blocking process-table work) never touch that state;
//! they post events through an [`OwnerHandle`].

use crate::error::{LaunchError, SystemError};
use crate::indicator::{IndicatorHandle, IndicatorIndex, Notifier};
use crate::launcher::{spawn_waiter, ExitReporter, LaunchedProcess, Launcher};
use crate::liveness::LivenessProber;
use crate::process_table::{exclude_own, MatchScope, ProcessEntry, ProcessTable, SignalOutcome};
use crate::registry::{LivenessSource, ProbeTarget, ProcessRegistry, RunRecord};
use crate::shortcut::{import_shortcuts, ExiftoolShortcutReader, ShortcutReader};
use crate::termination::{self, EXECUTABLE_PATTERN};
use cellar_core::config::SupervisorConfig;
use cellar_core::descriptor::{AppDescriptor, DescriptorId, DescriptorStore, DESCRIPTOR_EXTENSION};
use cellar_core::error::DescriptorError;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Work for the owner loop.
#[derive(Debug)]
pub enum OwnerEvent {
    /// Launch the descriptor, or stop it if it is running.
    Toggle(DescriptorId),
    Terminate(DescriptorId),
    KillAll,
    /// A file handed over by the gateway or the command line.
    OpenFile(PathBuf),
    /// Point a descriptor at a moved executable, then launch it.
    Relocate { id: DescriptorId, new_path: PathBuf },
    SetArguments { id: DescriptorId, arguments: String },
    ProbeSnapshot(oneshot::Sender<Vec<ProbeTarget>>),
    ProbeFinished(Vec<(DescriptorId, u64)>),
    ChildExited {
        id: DescriptorId,
        token: u64,
        status: Option<ExitStatus>,
    },
    /// Re-check every descriptor sharing this environment.
    RescanGroup(PathBuf),
    GroupScanned {
        prefix: PathBuf,
        /// Descriptors created from shortcuts found during the scan.
        imported: Vec<AppDescriptor>,
        results: Vec<(AppDescriptor, bool)>,
    },
    StartupScanned(Vec<ProcessEntry>),
    DescriptorCreated(Result<AppDescriptor, DescriptorError>),
    Relocated {
        previous: DescriptorId,
        result: Result<AppDescriptor, DescriptorError>,
    },
    Shutdown,
}

/// Posts work to the owner loop.
#[derive(Debug, Clone)]
pub struct OwnerHandle {
    tx: mpsc::UnboundedSender<OwnerEvent>,
}

impl OwnerHandle {
    pub fn post(&self, event: OwnerEvent) -> Result<(), SystemError> {
        self.tx.send(event).map_err(|_| SystemError::OwnerGone)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub fn owner_channel() -> (OwnerHandle, mpsc::UnboundedReceiver<OwnerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OwnerHandle { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct ShellSettings {
    /// Text identifying this application's own processes.
    pub self_signature: String,
    pub settle_delay: Duration,
    pub own_pid: u32,
}

impl ShellSettings {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            self_signature: config.self_signature.clone(),
            settle_delay: config.settle_delay(),
            own_pid: std::process::id(),
        }
    }
}

pub struct Shell {
    registry: ProcessRegistry,
    indicators: IndicatorIndex,
    notifier: Box<dyn Notifier>,
    store: DescriptorStore,
    launcher: Launcher,
    table: Arc<dyn ProcessTable>,
    prober: LivenessProber,
    shortcuts: Arc<dyn ShortcutReader>,
    owner: OwnerHandle,
    settings: ShellSettings,
}

impl Shell {
    pub fn new(
        store: DescriptorStore,
        launcher: Launcher,
        table: Arc<dyn ProcessTable>,
        indicators: IndicatorIndex,
        notifier: Box<dyn Notifier>,
        owner: OwnerHandle,
        settings: ShellSettings,
    ) -> Self {
        let prober = LivenessProber::new(table.clone(), settings.self_signature.clone());
        Self {
            registry: ProcessRegistry::new(),
            indicators,
            notifier,
            store,
            launcher,
            table,
            prober,
            shortcuts: Arc::new(ExiftoolShortcutReader),
            owner,
            settings,
        }
    }

    /// Replaces the `exiftool` based shortcut reader.
    pub fn with_shortcut_reader(mut self, reader: Arc<dyn ShortcutReader>) -> Self {
        self.shortcuts = reader;
        self
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn owner(&self) -> OwnerHandle {
        self.owner.clone()
    }

    /// A prober sharing this shell's process table and signature.
    pub fn prober(&self) -> LivenessProber {
        self.prober.clone()
    }

    /// Drains `events` until [`OwnerEvent::Shutdown`] or until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<OwnerEvent>) {
        info!("Owner loop started");
        while let Some(event) = events.recv().await {
            if self.handle_event(event).is_break() {
                break;
            }
        }
        // Applications outlive the launcher; they are picked up again on the next start.
        info!(running = self.registry.len(), "Owner loop stopped");
    }

    pub fn handle_event(&mut self, event: OwnerEvent) -> ControlFlow<()> {
        match event {
            OwnerEvent::Toggle(id) => self.launch_or_stop(&id),
            OwnerEvent::Terminate(id) => self.terminate(&id),
            OwnerEvent::KillAll => self.kill_all(),
            OwnerEvent::OpenFile(path) => self.open_file(path),
            OwnerEvent::Relocate { id, new_path } => self.relocate_and_launch(id, new_path),
            OwnerEvent::SetArguments { id, arguments } => self.set_launch_arguments(&id, &arguments),
            OwnerEvent::ProbeSnapshot(reply) => {
                let _ = reply.send(self.registry.probe_targets());
            }
            OwnerEvent::ProbeFinished(finished) => {
                for (id, token) in finished {
                    self.retire(&id, token);
                }
            }
            OwnerEvent::ChildExited { id, token, status } => {
                debug!(descriptor = %id, token, ?status, "Primary process exited");
                self.retire(&id, token);
            }
            OwnerEvent::RescanGroup(prefix) => self.rescan_group(prefix),
            OwnerEvent::GroupScanned {
                prefix,
                imported,
                results,
            } => self.apply_group_scan(prefix, imported, results),
            OwnerEvent::StartupScanned(entries) => self.apply_startup_scan(entries),
            OwnerEvent::DescriptorCreated(result) => match result {
                Ok(descriptor) => {
                    self.indicators.handle_for(&descriptor).show_stopped();
                    self.notifier.catalog_changed(&descriptor);
                }
                Err(e) => warn!("Could not create descriptor: {}", e),
            },
            OwnerEvent::Relocated { previous, result } => self.finish_relocation(previous, result),
            OwnerEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Stops `id` if it has a run record, launches it otherwise.
    pub fn launch_or_stop(&mut self, id: &DescriptorId) {
        if self.registry.contains(id) {
            info!(descriptor = %id, "Already running, stopping");
            self.terminate(id);
            return;
        }
        match self.store.find(id) {
            Ok(descriptor) => self.launch(&descriptor),
            Err(e) => {
                warn!(descriptor = %id, "Cannot launch: {}", e);
                self.notifier.launch_failed(id, &LaunchError::Descriptor(e));
            }
        }
    }

    fn launch(&mut self, descriptor: &AppDescriptor) {
        match self.launcher.launch(descriptor) {
            Ok(launched) => self.register_launch(descriptor, launched),
            Err(e @ LaunchError::TargetMissing { .. }) => {
                warn!(descriptor = %descriptor.id, "{}", e);
                self.notifier.target_missing(descriptor);
            }
            Err(e) => {
                warn!(descriptor = %descriptor.id, "{}", e);
                self.notifier.launch_failed(&descriptor.id, &e);
            }
        }
    }

    fn register_launch(&mut self, descriptor: &AppDescriptor, launched: LaunchedProcess) {
        let token = self.registry.next_token();
        let (exit_tx, exit_rx) = watch::channel(None);
        let indicator = self.indicators.handle_for(descriptor);
        let record = RunRecord {
            id: descriptor.id.clone(),
            token,
            pid: launched.pid,
            pgid: launched.pgid,
            probe_prefix: descriptor.probe_prefix(),
            prefix_path: descriptor.prefix_path.clone(),
            liveness: LivenessSource::OwnedHandle { exit: exit_rx },
            indicator: Some(indicator.clone()),
        };
        if let Err(e) = self.registry.register(record) {
            error!("{}; killing the duplicate", e);
            if let Some(pgid) = launched.pgid {
                let _ = termination::kill_group(self.table.as_ref(), pgid);
            }
            return;
        }
        indicator.show_running();

        spawn_waiter(
            launched.child,
            ExitReporter {
                id: descriptor.id.clone(),
                token,
                prefix_path: descriptor.prefix_path.clone(),
                exit: exit_tx,
                owner: self.owner.clone(),
                settle_delay: self.settings.settle_delay,
            },
        );
    }

    /// Kills the run of `id`. Unknown ids are a no-op.
    pub fn terminate(&mut self, id: &DescriptorId) {
        let Some(record) = self.registry.unregister(id) else {
            debug!(descriptor = %id, "Nothing to terminate");
            return;
        };
        self.reset_indicator(&record);

        match (&record.liveness, record.pgid) {
            (LivenessSource::OwnedHandle { .. }, Some(pgid)) => {
                match termination::kill_group(self.table.as_ref(), pgid) {
                    Ok(SignalOutcome::Delivered) => info!(descriptor = %id, pgid, "Terminated"),
                    Ok(SignalOutcome::NotFound) => debug!(descriptor = %id, pgid, "Already exited"),
                    Err(e) => warn!(descriptor = %id, pgid, "Termination failed: {}", e),
                }
                // The waiter rescans the group once the killed child has been reaped.
            }
            _ => {
                let table = self.table.clone();
                let signature = self.settings.self_signature.clone();
                let own_pid = self.settings.own_pid;
                let id = id.clone();
                let probe_prefix = record.probe_prefix;
                self.rescan_after(vec![record.prefix_path], move || {
                    let report = termination::kill_matching(table.as_ref(), &probe_prefix, &signature, own_pid);
                    info!(descriptor = %id, killed = report.killed.len(), "Terminated");
                });
            }
        }
    }

    /// Runs `kill` on the blocking pool, then rescans `prefixes` after the settle delay.
    ///
    /// Killed processes stay in the process table until their parent reaps them.
    fn rescan_after(&self, prefixes: Vec<PathBuf>, kill: impl FnOnce() + Send + 'static) {
        let owner = self.owner.clone();
        let settle_delay = self.settings.settle_delay;
        tokio::spawn(async move {
            if let Err(e) = tokio::task::spawn_blocking(kill).await {
                warn!("Termination task failed: {}", e);
            }
            tokio::time::sleep(settle_delay).await;
            for prefix in prefixes {
                if owner.post(OwnerEvent::RescanGroup(prefix)).is_err() {
                    break;
                }
            }
        });
    }

    /// Kills every running Windows executable and forgets all run records.
    pub fn kill_all(&mut self) {
        let records = self.registry.drain();
        for record in &records {
            self.reset_indicator(record);
        }
        // Waiters of owned runs rescan their own groups.
        let prefixes: BTreeSet<PathBuf> = records
            .into_iter()
            .filter(|record| !record.is_owned())
            .map(|record| record.prefix_path)
            .collect();

        let table = self.table.clone();
        let signature = self.settings.self_signature.clone();
        let own_pid = self.settings.own_pid;
        self.rescan_after(prefixes.into_iter().collect(), move || {
            termination::kill_all(table.as_ref(), &signature, own_pid);
        });
    }

    /// Launches a descriptor file, or turns any other file into a descriptor.
    pub fn open_file(&mut self, path: PathBuf) {
        let is_descriptor = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case(DESCRIPTOR_EXTENSION));
        if is_descriptor {
            match self.store.load(&path) {
                Ok(descriptor) if self.registry.contains(&descriptor.id) => {
                    info!(descriptor = %descriptor.id, "Already running");
                }
                Ok(descriptor) => self.launch(&descriptor),
                Err(e) => warn!(path = %path.display(), "Cannot open descriptor: {}", e),
            }
            return;
        }

        let store = self.store.clone();
        let owner = self.owner.clone();
        tokio::task::spawn_blocking(move || {
            let result = store.create_for_executable(&path);
            let _ = owner.post(OwnerEvent::DescriptorCreated(result));
        });
    }

    /// Re-points `id` at `new_path` (verifying its content hash) and launches it.
    pub fn relocate_and_launch(&mut self, id: DescriptorId, new_path: PathBuf) {
        let store = self.store.clone();
        let owner = self.owner.clone();
        tokio::task::spawn_blocking(move || {
            let result = store.relocate_executable(&id, &new_path);
            let _ = owner.post(OwnerEvent::Relocated { previous: id, result });
        });
    }

    fn finish_relocation(&mut self, previous: DescriptorId, result: Result<AppDescriptor, DescriptorError>) {
        match result {
            Ok(descriptor) => {
                info!(descriptor = %descriptor.id, path = %descriptor.executable_path.display(), "Executable relocated");
                if descriptor.id != previous {
                    self.indicators.remove(&previous);
                }
                self.notifier.catalog_changed(&descriptor);
                self.launch_or_stop(&descriptor.id);
            }
            Err(e) => {
                warn!(descriptor = %previous, "Relocation rejected: {}", e);
                self.notifier.launch_failed(&previous, &LaunchError::Descriptor(e));
            }
        }
    }

    pub fn set_launch_arguments(&mut self, id: &DescriptorId, arguments: &str) {
        match self.store.set_launch_arguments(id, arguments) {
            Ok(descriptor) => self.notifier.catalog_changed(&descriptor),
            Err(e) => warn!(descriptor = %id, "Could not save launch arguments: {}", e),
        }
    }

    /// Lists running Windows executables and adopts those matching a descriptor.
    pub fn reconcile_on_startup(&self) {
        let table = self.table.clone();
        let owner = self.owner.clone();
        let signature = self.settings.self_signature.clone();
        let own_pid = self.settings.own_pid;
        tokio::task::spawn_blocking(move || {
            let entries = match table.list_matching(EXECUTABLE_PATTERN, MatchScope::CommandLine) {
                Ok(entries) => exclude_own(entries, &signature, own_pid),
                Err(e) => {
                    warn!("Startup process scan failed: {}", e);
                    Vec::new()
                }
            };
            let _ = owner.post(OwnerEvent::StartupScanned(entries));
        });
    }

    fn apply_startup_scan(&mut self, entries: Vec<ProcessEntry>) {
        let command_lines: Vec<String> = entries.iter().map(|e| e.command_line.to_lowercase()).collect();
        let mut adopted = 0;
        for descriptor in self.store.load_all() {
            let indicator = self.indicators.handle_for(&descriptor);
            if self.registry.contains(&descriptor.id) {
                indicator.show_running();
                continue;
            }
            let prefix = descriptor.probe_prefix().to_lowercase();
            let live = !prefix.is_empty() && command_lines.iter().any(|line| line.contains(&prefix));
            if live {
                self.register_probed(&descriptor, indicator);
                adopted += 1;
            } else {
                indicator.show_stopped();
            }
        }
        info!(adopted, "Startup reconciliation finished");
    }

    /// Imports new shortcuts of `prefix`, then schedules a liveness check of
    /// every descriptor in it.
    pub fn rescan_group(&self, prefix: PathBuf) {
        let store = self.store.clone();
        let shortcuts = self.shortcuts.clone();
        let prober = self.prober.clone();
        let owner = self.owner.clone();
        tokio::task::spawn_blocking(move || {
            let imported = import_shortcuts(&store, shortcuts.as_ref(), &prefix);
            let descriptors = store.in_prefix(&prefix);
            if descriptors.is_empty() {
                debug!(prefix = %prefix.display(), "No descriptors in environment");
                return;
            }
            let results = prober.scan_group(descriptors);
            let _ = owner.post(OwnerEvent::GroupScanned {
                prefix,
                imported,
                results,
            });
        });
    }

    fn apply_group_scan(&mut self, prefix: PathBuf, imported: Vec<AppDescriptor>, results: Vec<(AppDescriptor, bool)>) {
        for descriptor in &imported {
            self.notifier.catalog_changed(descriptor);
        }
        let mut running = Vec::new();
        for (descriptor, live) in results {
            let indicator = self.indicators.handle_for(&descriptor);
            if self.registry.contains(&descriptor.id) {
                indicator.show_running();
                running.push(descriptor.id);
            } else if live {
                self.register_probed(&descriptor, indicator);
                running.push(descriptor.id);
            } else {
                indicator.show_stopped();
            }
        }
        self.notifier.group_refreshed(&prefix, &running);
    }

    fn register_probed(&mut self, descriptor: &AppDescriptor, indicator: IndicatorHandle) {
        let record = RunRecord {
            id: descriptor.id.clone(),
            token: self.registry.next_token(),
            pid: None,
            pgid: None,
            probe_prefix: descriptor.probe_prefix(),
            prefix_path: descriptor.prefix_path.clone(),
            liveness: LivenessSource::Probed,
            indicator: Some(indicator.clone()),
        };
        match self.registry.register(record) {
            Ok(()) => {
                info!(descriptor = %descriptor.id, "Found running");
                indicator.show_running();
            }
            Err(e) => debug!("{}", e),
        }
    }

    fn retire(&mut self, id: &DescriptorId, token: u64) {
        match self.registry.unregister_if_token(id, token) {
            Some(record) => {
                info!(descriptor = %id, "Run ended");
                self.reset_indicator(&record);
                self.rescan_group(record.prefix_path);
            }
            None => debug!(descriptor = %id, token, "Ignoring stale exit report"),
        }
    }

    fn reset_indicator(&self, record: &RunRecord) {
        if let Some(indicator) = record.indicator.clone().or_else(|| self.indicators.get(&record.id)) {
            indicator.show_stopped();
        }
    }
}
