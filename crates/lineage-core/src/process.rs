use std::{fmt, sync::Arc};

use lineage_common::{Gid, Pid, Uid, time::Timestamp};

use crate::file::FileInfo;

/// Identity of a process incarnation.
///
/// Pids are reused by the kernel, and exec replaces the image of a process
/// while keeping its pid: `version` tells these incarnations apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessKey {
    pub pid: Pid,
    pub version: u32,
}

impl ProcessKey {
    pub fn new(pid: Pid, version: u32) -> Self {
        Self { pid, version }
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.version)
    }
}

/// A node of the process tree.
///
/// The parent link is a key resolved through the tree registry, never an
/// owning handle. Retain count and tombstone are only changed by the tree,
/// under its lock.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    key: ProcessKey,
    parent_key: ProcessKey,
    file: Arc<FileInfo>,
    uid: Uid,
    gid: Gid,
    start_time: Option<Timestamp>,
    arguments: Option<Vec<String>>,
    pub(crate) parent: Option<ProcessKey>,
    pub(crate) retain_count: u32,
    pub(crate) tombstoned: bool,
}

impl ProcessRecord {
    pub fn new(key: ProcessKey, parent_key: ProcessKey, file: Arc<FileInfo>) -> Self {
        Self {
            key,
            parent_key,
            file,
            uid: Uid::from_raw(0),
            gid: Gid::from_raw(0),
            start_time: None,
            arguments: None,
            parent: None,
            retain_count: 0,
            tombstoned: false,
        }
    }

    pub fn with_ids(mut self, uid: Uid, gid: Gid) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn with_start_time(mut self, start_time: Timestamp) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn key(&self) -> ProcessKey {
        self.key
    }

    pub fn pid(&self) -> Pid {
        self.key.pid
    }

    /// Identity of the process this one was reported under: the forking
    /// parent, or the replaced incarnation for exec.
    pub fn parent_key(&self) -> ProcessKey {
        self.parent_key
    }

    /// Parent link, set when the record enters the tree.
    pub fn parent(&self) -> Option<ProcessKey> {
        self.parent
    }

    pub fn file(&self) -> &Arc<FileInfo> {
        &self.file
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn gid(&self) -> Gid {
        self.gid
    }

    pub fn start_time(&self) -> Option<Timestamp> {
        self.start_time
    }

    pub fn arguments(&self) -> Option<&[String]> {
        self.arguments.as_deref()
    }

    pub fn retain_count(&self) -> u32 {
        self.retain_count
    }

    /// True while some descendant depends on this record.
    pub fn is_retained(&self) -> bool {
        self.retain_count > 0
    }

    /// True once the process exited but is still kept for its descendants.
    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned
    }

    /// Set the parent link. A link already set is never moved.
    pub(crate) fn attach_parent(&mut self, parent: ProcessKey) {
        if self.parent.is_none() {
            self.parent = Some(parent);
        }
    }
}
