//! Seams between the supervisor and whatever presents state to the user.
//!
//! The owner loop is the only caller of these traits, so implementations are
//! never invoked concurrently with themselves from Cellar code.

use crate::error::LaunchError;
use cellar_core::descriptor::{AppDescriptor, DescriptorId};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A per-application run/stop affordance.
pub trait RunIndicator: Send + Sync {
    fn show_running(&self);
    fn show_stopped(&self);
}

pub type IndicatorHandle = Arc<dyn RunIndicator>;

type IndicatorFactory = Box<dyn Fn(&AppDescriptor) -> IndicatorHandle + Send>;

/// Maps descriptor ids to their indicators, creating missing ones on demand.
pub struct IndicatorIndex {
    handles: HashMap<DescriptorId, IndicatorHandle>,
    factory: IndicatorFactory,
}

impl IndicatorIndex {
    pub fn new(factory: impl Fn(&AppDescriptor) -> IndicatorHandle + Send + 'static) -> Self {
        Self {
            handles: HashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// An index whose indicators only log.
    pub fn logging() -> Self {
        Self::new(|descriptor| Arc::new(LogIndicator::new(descriptor)) as IndicatorHandle)
    }

    pub fn get(&self, id: &DescriptorId) -> Option<IndicatorHandle> {
        self.handles.get(id).cloned()
    }

    /// Returns the indicator for `descriptor`, creating it if needed.
    pub fn handle_for(&mut self, descriptor: &AppDescriptor) -> IndicatorHandle {
        let factory = &self.factory;
        self.handles
            .entry(descriptor.id.clone())
            .or_insert_with(|| factory(descriptor))
            .clone()
    }

    pub fn remove(&mut self, id: &DescriptorId) -> Option<IndicatorHandle> {
        self.handles.remove(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl fmt::Debug for IndicatorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorIndex")
            .field("ids", &self.handles.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// User-facing notifications raised by the owner loop.
pub trait Notifier: Send {
    /// The executable is gone; the user may point the descriptor at its new location.
    fn target_missing(&self, descriptor: &AppDescriptor);
    fn launch_failed(&self, id: &DescriptorId, error: &LaunchError);
    /// A descriptor was created or changed.
    fn catalog_changed(&self, descriptor: &AppDescriptor);
    /// Indicators of every descriptor in `prefix` were re-published.
    fn group_refreshed(&self, prefix: &Path, running: &[DescriptorId]);
}

/// Headless [`RunIndicator`] that reports state changes through `tracing`.
#[derive(Debug)]
pub struct LogIndicator {
    id: DescriptorId,
    name: String,
}

impl LogIndicator {
    pub fn new(descriptor: &AppDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            name: descriptor.display_name.clone(),
        }
    }
}

impl RunIndicator for LogIndicator {
    fn show_running(&self) {
        info!(descriptor = %self.id, name = %self.name, "running");
    }

    fn show_stopped(&self) {
        info!(descriptor = %self.id, name = %self.name, "stopped");
    }
}

/// Headless [`Notifier`] that reports through `tracing`.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn target_missing(&self, descriptor: &AppDescriptor) {
        warn!(
            descriptor = %descriptor.id,
            path = %descriptor.executable_path.display(),
            "Executable is missing; relocate it to launch again"
        );
    }

    fn launch_failed(&self, id: &DescriptorId, error: &LaunchError) {
        warn!(descriptor = %id, "Launch failed: {}", error);
    }

    fn catalog_changed(&self, descriptor: &AppDescriptor) {
        info!(descriptor = %descriptor.id, source = %descriptor.source.display(), "Descriptor added");
    }

    fn group_refreshed(&self, prefix: &Path, running: &[DescriptorId]) {
        info!(prefix = %prefix.display(), running = running.len(), "Environment group refreshed");
    }
}
