//! # Cellar System Layer (`cellar-system`)
//!
//! Runs Windows applications inside their isolated environments and keeps
//! track of which ones are alive.
//!
//! - [`shell::Shell`] is the owner loop. It holds the process registry and the
//!   indicators and is the only place either is mutated.
//! - [`launcher`] starts applications in their own process group and reports
//!   their exit.
//! - [`liveness`] periodically checks registered runs against the process table.
//! - [`termination`] kills single applications or every running executable.
//! - [`shortcut`] turns shortcuts left by installers into descriptors.
//! - [`gateway`] makes sure only one instance runs and forwards files to it.

pub mod error;
pub mod gateway;
pub mod indicator;
pub mod launcher;
pub mod liveness;
pub mod process_table;
pub mod registry;
pub mod shell;
pub mod shortcut;
pub mod termination;

pub use error::{GatewayError, LaunchError, ProcessTableError, RegistryError, ShortcutError, SystemError};
pub use gateway::{claim, Claim, ForwardRequest, GatewayServer};
pub use indicator::{IndicatorHandle, IndicatorIndex, LogIndicator, LogNotifier, Notifier, RunIndicator};
pub use launcher::Launcher;
pub use liveness::LivenessProber;
pub use process_table::{PgrepProcessTable, ProcessTable};
pub use registry::ProcessRegistry;
pub use shell::{owner_channel, OwnerEvent, OwnerHandle, Shell, ShellSettings};
pub use shortcut::{ExiftoolShortcutReader, ShortcutReader};
