//! Access to the OS process table.
//!
//! Everything here blocks; async callers run it through
//! `tokio::task::spawn_blocking`.

use crate::error::ProcessTableError;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::process::Command;
use tracing::trace;

/// What a pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    /// The full command line (`pgrep -f`).
    CommandLine,
    /// The kernel process name, at most 15 bytes.
    ProcessName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command_line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    Process(u32),
    Group(i32),
}

impl fmt::Display for SignalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalTarget::Process(pid) => write!(f, "process {}", pid),
            SignalTarget::Group(pgid) => write!(f, "process group {}", pgid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The target does not exist (`ESRCH`).
    NotFound,
}

/// Query and signal processes.
pub trait ProcessTable: Send + Sync {
    /// Lists processes whose name or command line matches the regular
    /// expression `pattern`, case-insensitively.
    fn list_matching(&self, pattern: &str, scope: MatchScope) -> Result<Vec<ProcessEntry>, ProcessTableError>;

    /// Sends `signal` to `target`. `None` only checks that the target exists.
    fn signal(&self, target: SignalTarget, signal: Option<Signal>) -> Result<SignalOutcome, ProcessTableError>;
}

/// [`ProcessTable`] backed by `pgrep` and `kill(2)`.
#[derive(Debug, Clone, Default)]
pub struct PgrepProcessTable;

impl PgrepProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for PgrepProcessTable {
    fn list_matching(&self, pattern: &str, scope: MatchScope) -> Result<Vec<ProcessEntry>, ProcessTableError> {
        let mut command = Command::new("pgrep");
        command.arg("-a").arg("-i");
        if scope == MatchScope::CommandLine {
            command.arg("-f");
        }
        command.arg("--").arg(pattern);

        let output = command.output().map_err(|e| ProcessTableError::ProbeQueryFailed {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        match output.status.code() {
            Some(0) => {
                let entries = parse_pgrep_output(&String::from_utf8_lossy(&output.stdout));
                trace!(pattern, matches = entries.len(), "pgrep finished");
                Ok(entries)
            }
            // pgrep exits with 1 when nothing matched.
            Some(1) => Ok(Vec::new()),
            _ => Err(ProcessTableError::ProbeQueryFailed {
                pattern: pattern.to_string(),
                reason: format!(
                    "pgrep exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
        }
    }

    fn signal(&self, target: SignalTarget, signal: Option<Signal>) -> Result<SignalOutcome, ProcessTableError> {
        let result = match target {
            // Non-positive ids address whole groups or every process; never send those.
            SignalTarget::Process(pid) if pid == 0 || pid > i32::MAX as u32 => Err(Errno::EINVAL),
            SignalTarget::Group(pgid) if pgid <= 1 => Err(Errno::EINVAL),
            SignalTarget::Process(pid) => kill(Pid::from_raw(pid as i32), signal),
            SignalTarget::Group(pgid) => killpg(Pid::from_raw(pgid), signal),
        };
        match result {
            Ok(()) => Ok(SignalOutcome::Delivered),
            Err(Errno::ESRCH) => Ok(SignalOutcome::NotFound),
            Err(source) => Err(ProcessTableError::Signal {
                target: target.to_string(),
                source,
            }),
        }
    }
}

/// Parses `pgrep -a` output: one `<pid> <command line>` per line.
pub fn parse_pgrep_output(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            pid.parse::<u32>().ok().map(|pid| ProcessEntry {
                pid,
                command_line: rest.trim().to_string(),
            })
        })
        .collect()
}

/// Drops entries belonging to this application: the process `own_pid` and any
/// command line containing `signature` (case-insensitive).
pub fn exclude_own(entries: Vec<ProcessEntry>, signature: &str, own_pid: u32) -> Vec<ProcessEntry> {
    let signature = signature.to_lowercase();
    entries
        .into_iter()
        .filter(|entry| entry.pid != own_pid)
        .filter(|entry| signature.is_empty() || !entry.command_line.to_lowercase().contains(&signature))
        .collect()
}
