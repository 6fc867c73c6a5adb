//! Run records of applications believed to be running.
//!
//! The registry is a plain owned map. It lives inside the owner loop and is
//! never shared between threads.

use crate::error::RegistryError;
use crate::indicator::IndicatorHandle;
use cellar_core::descriptor::DescriptorId;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use tokio::sync::watch;

/// Publishes a spawned child's exit status; `None` while it runs.
pub type ExitWatch = watch::Receiver<Option<ExitStatus>>;

/// How the liveness of a record is established.
#[derive(Debug, Clone)]
pub enum LivenessSource {
    /// Spawned by this instance. A waiter task owns the child and reports its exit.
    OwnedHandle { exit: ExitWatch },
    /// Found in the process table. Liveness is re-checked by name.
    Probed,
}

pub struct RunRecord {
    pub id: DescriptorId,
    /// Distinguishes successive runs of the same descriptor.
    pub token: u64,
    pub pid: Option<u32>,
    pub pgid: Option<i32>,
    /// Leading characters of the executable stem, see `PROBE_PREFIX_LEN`.
    pub probe_prefix: String,
    pub prefix_path: PathBuf,
    pub liveness: LivenessSource,
    pub indicator: Option<IndicatorHandle>,
}

impl RunRecord {
    pub fn is_owned(&self) -> bool {
        matches!(self.liveness, LivenessSource::OwnedHandle { .. })
    }

    pub fn probe_target(&self) -> ProbeTarget {
        ProbeTarget {
            id: self.id.clone(),
            token: self.token,
            pgid: self.pgid,
            probe_prefix: self.probe_prefix.clone(),
            exit: match &self.liveness {
                LivenessSource::OwnedHandle { exit } => Some(exit.clone()),
                LivenessSource::Probed => None,
            },
        }
    }
}

impl fmt::Debug for RunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRecord")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("pid", &self.pid)
            .field("pgid", &self.pgid)
            .field("probe_prefix", &self.probe_prefix)
            .field("prefix_path", &self.prefix_path)
            .field("owned", &self.is_owned())
            .field("has_indicator", &self.indicator.is_some())
            .finish()
    }
}

/// Everything the liveness prober needs to check one record off the owner.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub id: DescriptorId,
    pub token: u64,
    pub pgid: Option<i32>,
    pub probe_prefix: String,
    pub exit: Option<ExitWatch>,
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    records: HashMap<DescriptorId, RunRecord>,
    last_token: u64,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a fresh launch token.
    pub fn next_token(&mut self) -> u64 {
        self.last_token += 1;
        self.last_token
    }

    /// Adds `record`. At most one record per descriptor id exists at any time.
    pub fn register(&mut self, record: RunRecord) -> Result<(), RegistryError> {
        if self.records.contains_key(&record.id) {
            return Err(RegistryError::AlreadyRunning(record.id));
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    /// Removes the record. Resetting its indicator is the caller's job.
    pub fn unregister(&mut self, id: &DescriptorId) -> Option<RunRecord> {
        self.records.remove(id)
    }

    /// Removes the record only if it still belongs to the run identified by `token`.
    pub fn unregister_if_token(&mut self, id: &DescriptorId, token: u64) -> Option<RunRecord> {
        match self.records.get(id) {
            Some(record) if record.token == token => self.records.remove(id),
            _ => None,
        }
    }

    pub fn lookup(&self, id: &DescriptorId) -> Option<&RunRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &DescriptorId) -> bool {
        self.records.contains_key(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &RunRecord> {
        self.records.values()
    }

    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.records.values().map(RunRecord::probe_target).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn drain(&mut self) -> Vec<RunRecord> {
        self.records.drain().map(|(_, record)| record).collect()
    }
}
