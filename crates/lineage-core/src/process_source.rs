//! Enumeration of the processes already running when the tree is built.

use std::{collections::HashMap, sync::Arc};

use lineage_common::{
    Pid,
    parsing::procfs::{self, ProcfsError},
    time::Timestamp,
};
use thiserror::Error;

use crate::{
    file::{FileIdentityCache, FileInfo},
    process::{ProcessKey, ProcessRecord},
};

/// Synthetic root of the process hierarchy. Init and kernel threads are its
/// children.
pub const PID_0: Pid = Pid::from_raw(0);

/// Clock ticks per second used by procfs time fields.
const USER_HZ: u64 = 100;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Procfs(#[from] ProcfsError),
    #[error("enumerating processes: {0}")]
    Other(String),
}

/// Source of the running process population, queried once when a tree is
/// constructed.
pub trait ProcessSource {
    /// Running processes grouped by parent pid.
    fn enumerate(&self) -> Result<HashMap<Pid, Vec<ProcessRecord>>, SourceError>;
}

/// Reads the running processes from `/proc`.
///
/// Linux has no notion of pid version, every process found gets version 0.
pub struct ProcfsProcessSource {
    file_cache: Arc<FileIdentityCache>,
}

impl ProcfsProcessSource {
    pub fn new(file_cache: Arc<FileIdentityCache>) -> Self {
        Self { file_cache }
    }

    fn load_process(&self, pid: Pid) -> Result<ProcessRecord, ProcfsError> {
        let status = procfs::get_process_status(pid)?;
        let file = match procfs::get_process_image(pid) {
            Ok(image) => self.file_cache.resolve(&image.to_string_lossy(), None),
            Err(err) => {
                // Kernel threads have no image.
                log::trace!("{err}");
                let comm = procfs::get_process_comm(pid).unwrap_or_default();
                Arc::new(FileInfo::lightweight(String::new()).with_name(comm))
            }
        };
        let mut record = ProcessRecord::new(
            ProcessKey::new(pid, 0),
            ProcessKey::new(status.ppid, 0),
            file,
        )
        .with_ids(status.uid, status.gid);
        match procfs::get_process_start_time(pid) {
            Ok(ticks) => {
                let nanos = ticks.saturating_mul(1_000_000_000 / USER_HZ);
                record = record.with_start_time(Timestamp::from(nanos))
            }
            Err(err) => log::debug!("{err}"),
        }
        match procfs::get_process_command_line(pid) {
            Ok(argv) => record = record.with_arguments(argv),
            Err(err) => log::debug!("{err}"),
        }
        Ok(record)
    }
}

impl ProcessSource for ProcfsProcessSource {
    fn enumerate(&self) -> Result<HashMap<Pid, Vec<ProcessRecord>>, SourceError> {
        let mut children: HashMap<Pid, Vec<ProcessRecord>> = HashMap::new();
        for pid in procfs::get_running_processes()? {
            match self.load_process(pid) {
                Ok(record) => children
                    .entry(record.parent_key().pid)
                    .or_default()
                    .push(record),
                // The process may have exited since listing.
                Err(err) => log::debug!("Skipping process {pid}: {err}"),
            }
        }
        Ok(children)
    }
}
