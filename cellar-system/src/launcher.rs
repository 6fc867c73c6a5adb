//! Starting applications inside their isolated environment.

use crate::error::LaunchError;
use crate::shell::{OwnerEvent, OwnerHandle};
use cellar_core::descriptor::{AppDescriptor, DescriptorId};
use nix::unistd::{getpgid, Pid};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Environment variable selecting the isolated environment for the runner.
pub const PREFIX_ENV: &str = "WINEPREFIX";

/// A freshly started application.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub child: Child,
    pub pid: Option<u32>,
    pub pgid: Option<i32>,
}

/// Starts executables through the configured runner.
#[derive(Debug, Clone)]
pub struct Launcher {
    runner: String,
}

impl Launcher {
    pub fn new(runner: impl Into<String>) -> Self {
        Self { runner: runner.into() }
    }

    /// Builds the command line for `descriptor` without starting it.
    pub fn command_for(&self, descriptor: &AppDescriptor) -> Result<Command, LaunchError> {
        if !descriptor.executable_path.is_file() {
            return Err(LaunchError::TargetMissing {
                id: descriptor.id.clone(),
                path: descriptor.executable_path.clone(),
            });
        }
        let arguments = shell_words::split(&descriptor.launch_arguments).map_err(|e| LaunchError::InvalidArguments {
            id: descriptor.id.clone(),
            reason: e.to_string(),
        })?;
        let working_dir = descriptor
            .executable_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut command = Command::new(&self.runner);
        command
            .arg(descriptor.executable_name())
            .args(arguments)
            .current_dir(working_dir)
            .env(PREFIX_ENV, &descriptor.prefix_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own group so the whole tree can be signalled at once.
            .process_group(0)
            .kill_on_drop(false);
        Ok(command)
    }

    /// Starts `descriptor` in a new process group.
    pub fn launch(&self, descriptor: &AppDescriptor) -> Result<LaunchedProcess, LaunchError> {
        let mut command = self.command_for(descriptor)?;
        let child = command.spawn().map_err(|source| LaunchError::SpawnFailed {
            id: descriptor.id.clone(),
            command: format!("{} {}", self.runner, descriptor.executable_name()),
            source,
        })?;

        let pid = child.id();
        let pgid = pid.map(|pid| {
            getpgid(Some(Pid::from_raw(pid as i32)))
                .map(|pgid| pgid.as_raw())
                .unwrap_or(pid as i32)
        });
        info!(descriptor = %descriptor.id, pid, pgid, runner = %self.runner, "Launched");
        Ok(LaunchedProcess { child, pid, pgid })
    }
}

/// Everything the waiter task needs to report a child's exit.
#[derive(Debug)]
pub struct ExitReporter {
    pub id: DescriptorId,
    pub token: u64,
    pub prefix_path: PathBuf,
    pub exit: watch::Sender<Option<ExitStatus>>,
    pub owner: OwnerHandle,
    /// Delay between the exit and the rescan of the environment group.
    pub settle_delay: Duration,
}

/// Waits for `child`, publishes its exit and schedules a group rescan.
pub fn spawn_waiter(mut child: Child, reporter: ExitReporter) -> JoinHandle<()> {
    tokio::spawn(async move {
        let status = match child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(descriptor = %reporter.id, "Waiting for child failed: {}", e);
                None
            }
        };
        if let Some(status) = status {
            // Nobody listening is fine: the record may already be gone.
            let _ = reporter.exit.send(Some(status));
        }
        drop(reporter.exit);
        debug!(descriptor = %reporter.id, ?status, "Child exited");

        let exited = OwnerEvent::ChildExited {
            id: reporter.id.clone(),
            token: reporter.token,
            status,
        };
        if reporter.owner.post(exited).is_err() {
            return;
        }

        // Installers hand over to continuation processes after exiting.
        tokio::time::sleep(reporter.settle_delay).await;
        let _ = reporter.owner.post(OwnerEvent::RescanGroup(reporter.prefix_path));
    })
}
