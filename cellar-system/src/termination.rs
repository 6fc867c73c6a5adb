//! Forced termination of applications. Everything here blocks.

use crate::error::ProcessTableError;
use crate::process_table::{exclude_own, MatchScope, ProcessTable, SignalOutcome, SignalTarget};
use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

/// Pattern selecting every process that runs a Windows executable.
pub const EXECUTABLE_PATTERN: &str = r"\.exe";

/// What a kill pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KillReport {
    pub killed: Vec<u32>,
    pub already_gone: Vec<u32>,
    pub failed: Vec<u32>,
}

impl KillReport {
    fn record(&mut self, table: &dyn ProcessTable, pid: u32) {
        match table.signal(SignalTarget::Process(pid), Some(Signal::SIGKILL)) {
            Ok(SignalOutcome::Delivered) => self.killed.push(pid),
            Ok(SignalOutcome::NotFound) => {
                debug!(pid, "Process already gone");
                self.already_gone.push(pid);
            }
            Err(e) => {
                warn!(pid, "Failed to kill process: {}", e);
                self.failed.push(pid);
            }
        }
    }
}

/// Sends `SIGKILL` to the whole process group.
///
/// A group that has already vanished yields `Ok(SignalOutcome::NotFound)`.
pub fn kill_group(table: &dyn ProcessTable, pgid: i32) -> Result<SignalOutcome, ProcessTableError> {
    let outcome = table.signal(SignalTarget::Group(pgid), Some(Signal::SIGKILL))?;
    if outcome == SignalOutcome::NotFound {
        debug!(pgid, "Process group already gone");
    }
    Ok(outcome)
}

/// Kills every process whose command line contains `probe_prefix`, except
/// this application's own processes.
pub fn kill_matching(table: &dyn ProcessTable, probe_prefix: &str, self_signature: &str, own_pid: u32) -> KillReport {
    let mut report = KillReport::default();
    if probe_prefix.is_empty() {
        return report;
    }
    let entries = match table.list_matching(&regex::escape(probe_prefix), MatchScope::CommandLine) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(probe_prefix, "Could not list processes to terminate: {}", e);
            return report;
        }
    };
    for entry in exclude_own(entries, self_signature, own_pid) {
        report.record(table, entry.pid);
    }
    report
}

/// Kills every process running a Windows executable, newest listing entries first.
///
/// Skips pid 1, this process and any command line containing `self_signature`.
pub fn kill_all(table: &dyn ProcessTable, self_signature: &str, own_pid: u32) -> KillReport {
    let mut report = KillReport::default();
    let entries = match table.list_matching(EXECUTABLE_PATTERN, MatchScope::CommandLine) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list running executables: {}", e);
            return report;
        }
    };
    let mut targets: Vec<u32> = exclude_own(entries, self_signature, own_pid)
        .into_iter()
        .map(|entry| entry.pid)
        .filter(|pid| *pid != 1)
        .collect();
    targets.reverse();

    for pid in targets {
        report.record(table, pid);
    }
    info!(
        killed = report.killed.len(),
        already_gone = report.already_gone.len(),
        failed = report.failed.len(),
        "Kill-all finished"
    );
    report
}
