//! Liveness checks for registered runs.
//!
//! The [`LivenessProber`] wakes up every probe interval, asks the owner loop
//! for a snapshot of the registry, checks each target on the blocking pool
//! and posts back the runs that have ended. The owner only retires a run if
//! its launch token still matches, so late results for a replaced run are
//! ignored.
//!
//! Probed runs are recognised by the first [`PROBE_PREFIX_LEN`] characters of
//! the executable stem appearing in a command line. Unrelated processes that
//! happen to contain the same text keep a run alive; that false positive is
//! accepted.
//!
//! [`PROBE_PREFIX_LEN`]: cellar_core::descriptor::PROBE_PREFIX_LEN

use crate::process_table::{exclude_own, MatchScope, ProcessTable, SignalOutcome, SignalTarget};
use crate::registry::ProbeTarget;
use crate::shell::{OwnerEvent, OwnerHandle};
use cellar_core::descriptor::{AppDescriptor, DescriptorId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

#[derive(Clone)]
pub struct LivenessProber {
    table: Arc<dyn ProcessTable>,
    self_signature: String,
    own_pid: u32,
}

impl LivenessProber {
    pub fn new(table: Arc<dyn ProcessTable>, self_signature: impl Into<String>) -> Self {
        Self {
            table,
            self_signature: self_signature.into(),
            own_pid: std::process::id(),
        }
    }

    /// Whether the run described by `target` has ended. Blocks.
    pub fn is_finished(&self, target: &ProbeTarget) -> bool {
        if let Some(exit) = &target.exit {
            // A dropped sender means the waiter is gone without reporting.
            if exit.borrow().is_some() || exit.has_changed().is_err() {
                return true;
            }
        }

        if let Some(pgid) = target.pgid {
            return match self.table.signal(SignalTarget::Group(pgid), None) {
                Ok(SignalOutcome::Delivered) => false,
                Ok(SignalOutcome::NotFound) => true,
                Err(e) => {
                    warn!(descriptor = %target.id, pgid, "Group liveness check failed: {}", e);
                    true
                }
            };
        }

        match self
            .table
            .list_matching(&regex::escape(&target.probe_prefix), MatchScope::CommandLine)
        {
            Ok(entries) => exclude_own(entries, &self.self_signature, self.own_pid).is_empty(),
            Err(e) => {
                warn!(descriptor = %target.id, "Liveness query failed, treating run as finished: {}", e);
                true
            }
        }
    }

    /// Checks every target and returns the `(id, token)` pairs that have ended. Blocks.
    pub fn finished_targets(&self, targets: &[ProbeTarget]) -> Vec<(DescriptorId, u64)> {
        targets
            .iter()
            .filter(|target| self.is_finished(target))
            .map(|target| (target.id.clone(), target.token))
            .collect()
    }

    /// Whether any process named like `descriptor`'s executable is alive. Blocks.
    pub fn is_running_by_name(&self, descriptor: &AppDescriptor) -> bool {
        let prefix = descriptor.probe_prefix();
        if prefix.is_empty() {
            return false;
        }
        match self.table.list_matching(&regex::escape(&prefix), MatchScope::ProcessName) {
            Ok(entries) => !exclude_own(entries, &self.self_signature, self.own_pid).is_empty(),
            Err(e) => {
                warn!(descriptor = %descriptor.id, "Process name query failed: {}", e);
                false
            }
        }
    }

    /// Pairs each descriptor of a group with its current liveness. Blocks.
    pub fn scan_group(&self, descriptors: Vec<AppDescriptor>) -> Vec<(AppDescriptor, bool)> {
        descriptors
            .into_iter()
            .map(|descriptor| {
                let live = self.is_running_by_name(&descriptor);
                (descriptor, live)
            })
            .collect()
    }

    /// Starts the periodic probe. The task ends once the owner loop is gone.
    pub fn spawn(self, owner: OwnerHandle, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let (reply, snapshot) = oneshot::channel();
                if owner.post(OwnerEvent::ProbeSnapshot(reply)).is_err() {
                    break;
                }
                let targets = match snapshot.await {
                    Ok(targets) => targets,
                    Err(_) => break,
                };
                if targets.is_empty() {
                    continue;
                }
                trace!(targets = targets.len(), "Probing registered runs");

                let prober = self.clone();
                let finished = match tokio::task::spawn_blocking(move || prober.finished_targets(&targets)).await {
                    Ok(finished) => finished,
                    Err(e) => {
                        warn!("Liveness probe task failed: {}", e);
                        continue;
                    }
                };
                if !finished.is_empty() {
                    debug!(finished = finished.len(), "Runs ended");
                    if owner.post(OwnerEvent::ProbeFinished(finished)).is_err() {
                        break;
                    }
                }
            }
            debug!("Liveness prober stopped");
        })
    }
}
