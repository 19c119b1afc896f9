//! Concurrent model of the host process hierarchy.
//!
//! The tree is fed by several observing clients. Each reports fork, exec and
//! exit events stamped with the host monotonic clock, in increasing order for
//! a given client but arbitrarily interleaved with the other clients. An exit
//! can't be applied as soon as one client reports it: a slower client may still
//! deliver events for descendants that happened before that exit, and those
//! need the exited process to resolve their ancestry. Exits are therefore held
//! until every client has moved past them (the global watermark).
//!
//! Records are owned by the registry map. Parent links are keys, and every
//! record keeps a retain count: the number of descendants resolving their
//! ancestry through it. An exited record that is still retained is
//! tombstoned, and removed by the cascade that drops its count to zero.

use std::{collections::HashMap, sync::Mutex};

use lineage_common::{Pid, time::Timestamp};
use strum::IntoEnumIterator;

use crate::{
    config::{ConfigError, SectionConfig},
    event::{ClientId, Event, Payload},
    process::{ProcessKey, ProcessRecord},
    process_source::{PID_0, ProcessSource},
};

/// Typed view of the `[process_tree]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTreeConfig {
    pub clients: Vec<ClientId>,
}

impl Default for ProcessTreeConfig {
    fn default() -> Self {
        Self {
            clients: ClientId::iter().collect(),
        }
    }
}

impl TryFrom<&SectionConfig> for ProcessTreeConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        let clients = config.get_list_with_default("clients", ClientId::iter().collect())?;
        if clients.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "clients".to_string(),
                value: config.get_raw("clients").unwrap_or_default().to_string(),
                err: "at least one client is required".to_string(),
            });
        }
        Ok(ProcessTreeConfig { clients })
    }
}

pub struct ProcessTree {
    inner: Mutex<TreeState>,
}

#[derive(Default)]
struct TreeState {
    processes: HashMap<ProcessKey, ProcessRecord>,
    /// Latest event time seen from each client.
    watermarks: HashMap<ClientId, Timestamp>,
    /// Exits waiting for the global watermark to pass them.
    pending_deletions: HashMap<ProcessKey, Timestamp>,
}

impl ProcessTree {
    /// Build a tree tracking `clients`, seeded with the processes currently
    /// reported by `source`.
    pub fn new(clients: impl IntoIterator<Item = ClientId>, source: &dyn ProcessSource) -> Self {
        let mut state = TreeState {
            watermarks: clients
                .into_iter()
                .map(|client| (client, Timestamp::ZERO))
                .collect(),
            ..Default::default()
        };
        state.fill(source);
        Self {
            inner: Mutex::new(state),
        }
    }

    pub fn from_config(config: &ProcessTreeConfig, source: &dyn ProcessSource) -> Self {
        Self::new(config.clients.iter().copied(), source)
    }

    /// Return the record registered under `key`, tombstoned or not.
    pub fn get(&self, key: &ProcessKey) -> Option<ProcessRecord> {
        self.inner.lock().unwrap().processes.get(key).cloned()
    }

    /// Apply an event observed by `client`.
    ///
    /// # Panics
    ///
    /// On exec events whose new incarnation doesn't share the pid of the
    /// replaced one.
    pub fn add_event(&self, event: Event, client: ClientId) {
        let mut state = self.inner.lock().unwrap();

        state
            .watermarks
            .entry(client)
            .and_modify(|watermark| *watermark = (*watermark).max(event.timestamp))
            .or_insert_with(|| {
                log::warn!("Event from untracked client {client}, tracking it from now on");
                event.timestamp
            });

        match event.payload {
            Payload::Fork { child } => state.add_fork(child),
            Payload::Exec { target } => state.add_exec(event.process, target),
            Payload::Exit => state.add_exit(event.process, event.timestamp),
            Payload::Other => {}
        }

        state.flush_pending_deletions();
    }

    /// Number of registered incarnations, tombstoned ones included.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().processes.len()
    }

    /// Time before which every client has reported all its events.
    pub fn global_watermark(&self) -> Timestamp {
        self.inner.lock().unwrap().global_watermark()
    }

    pub fn watermark(&self, client: ClientId) -> Option<Timestamp> {
        self.inner.lock().unwrap().watermarks.get(&client).copied()
    }

    /// Exits observed but not applied yet, with their time.
    pub fn pending_deletions(&self) -> HashMap<ProcessKey, Timestamp> {
        self.inner.lock().unwrap().pending_deletions.clone()
    }

    /// Snapshot of all the registered records, ordered by key.
    pub fn processes(&self) -> Vec<ProcessRecord> {
        let state = self.inner.lock().unwrap();
        let mut processes: Vec<ProcessRecord> = state.processes.values().cloned().collect();
        processes.sort_by_key(ProcessRecord::key);
        processes
    }

    /// Ancestors of `key`, closest first. The record itself is not included.
    pub fn ancestors(&self, key: &ProcessKey) -> Vec<ProcessRecord> {
        let state = self.inner.lock().unwrap();
        let mut ancestors = Vec::new();
        let mut current = state.processes.get(key).and_then(ProcessRecord::parent);
        while let Some(parent_key) = current {
            let Some(parent) = state.processes.get(&parent_key) else {
                break;
            };
            ancestors.push(parent.clone());
            current = parent.parent();
        }
        ancestors
    }

    /// Image names of the ancestors of `key`, closest first.
    pub fn parent_names(&self, key: &ProcessKey) -> Vec<String> {
        self.ancestors(key)
            .iter()
            .map(|ancestor| ancestor.file().name().to_string())
            .collect()
    }

    /// Signing team of the ancestors of `key` that have one, closest first.
    pub fn parent_team_ids(&self, key: &ProcessKey) -> Vec<String> {
        self.ancestors(key)
            .iter()
            .filter_map(|ancestor| ancestor.file().signature()?.team_id.clone())
            .collect()
    }

    /// Signing identifier of the ancestors of `key` that have one, closest first.
    pub fn parent_signing_ids(&self, key: &ProcessKey) -> Vec<String> {
        self.ancestors(key)
            .iter()
            .filter_map(|ancestor| ancestor.file().signature()?.signing_id.clone())
            .collect()
    }
}

impl TreeState {
    /// Seed the registry with the running processes, walking down from pid 0.
    fn fill(&mut self, source: &dyn ProcessSource) {
        log::info!("Loading running processes");
        let mut children = match source.enumerate() {
            Ok(children) => children,
            Err(err) => {
                lineage_common::log_error("Error loading running processes", err);
                return;
            }
        };

        self.fill_children(PID_0, None, &mut children);

        if !children.is_empty() {
            // The parent exited between listing and reading. Use the topmost
            // remaining ones as roots.
            let pids: Vec<Pid> = children
                .values()
                .flatten()
                .map(ProcessRecord::pid)
                .collect();
            let roots: Vec<Pid> = children
                .keys()
                .filter(|ppid| !pids.contains(ppid))
                .copied()
                .collect();
            log::debug!("Found processes not starting from root, parents: {roots:?}");
            for ppid in roots {
                self.fill_children(ppid, None, &mut children);
            }
        }
        log::info!("Process tree seeded with {} processes", self.processes.len());
    }

    fn fill_children(
        &mut self,
        ppid: Pid,
        parent: Option<ProcessKey>,
        children: &mut HashMap<Pid, Vec<ProcessRecord>>,
    ) {
        for mut record in children.remove(&ppid).unwrap_or_default() {
            let key = record.key();
            if let Some(parent) = parent {
                record.attach_parent(parent);
            }
            self.processes.insert(key, record);
            self.retain_ancestors(key);
            self.fill_children(key.pid, Some(key), children);
        }
    }

    fn add_fork(&mut self, mut child: ProcessRecord) {
        let parent = child.parent_key();
        if !self.processes.contains_key(&parent) {
            log::debug!("Dropping fork of {}: parent {parent} not found", child.key());
            return;
        }
        let key = child.key();
        if self.processes.contains_key(&key) {
            log::debug!("Dropping fork of {key}: already tracked");
            return;
        }
        child.attach_parent(parent);
        self.processes.insert(key, child);
        self.retain_ancestors(key);
    }

    fn add_exec(&mut self, old: ProcessKey, mut target: ProcessRecord) {
        assert_eq!(
            target.pid(),
            old.pid,
            "exec target {} doesn't replace {old}",
            target.key()
        );
        if !self.processes.contains_key(&old) {
            log::debug!("Dropping exec of {}: {old} not found", target.key());
            return;
        }
        let key = target.key();
        if self.processes.contains_key(&key) {
            log::debug!("Dropping exec of {key}: already tracked");
            return;
        }
        target.attach_parent(old);
        self.processes.insert(key, target);
        self.retain_ancestors(key);
        // Just retained by the new incarnation, so this only tombstones it.
        self.try_delete(old);
    }

    fn add_exit(&mut self, key: ProcessKey, timestamp: Timestamp) {
        if timestamp <= self.global_watermark() {
            self.try_delete(key);
        } else {
            log::trace!("Exit of {key} at {timestamp} deferred");
            let exit_time = self.pending_deletions.entry(key).or_default();
            *exit_time = (*exit_time).max(timestamp);
        }
    }

    fn global_watermark(&self) -> Timestamp {
        self.watermarks
            .values()
            .min()
            .copied()
            .unwrap_or(Timestamp::ZERO)
    }

    fn flush_pending_deletions(&mut self) {
        if self.pending_deletions.is_empty() {
            return;
        }
        let watermark = self.global_watermark();
        let ready: Vec<ProcessKey> = self
            .pending_deletions
            .iter()
            .filter(|(_, exit_time)| **exit_time <= watermark)
            .map(|(key, _)| *key)
            .collect();
        for key in ready {
            log::trace!("Applying exit of {key}, watermark {watermark}");
            self.pending_deletions.remove(&key);
            self.try_delete(key);
        }
    }

    /// Add one to the retain count of every ancestor of `key`.
    fn retain_ancestors(&mut self, key: ProcessKey) {
        let mut current = self.processes.get(&key).and_then(ProcessRecord::parent);
        while let Some(parent_key) = current {
            let Some(parent) = self.processes.get_mut(&parent_key) else {
                break;
            };
            parent.retain_count += 1;
            current = parent.parent;
        }
    }

    /// Remove `key` if no descendant depends on it, tombstone it otherwise.
    fn try_delete(&mut self, key: ProcessKey) {
        let Some(record) = self.processes.get_mut(&key) else {
            return;
        };
        if record.is_retained() {
            record.tombstoned = true;
        } else {
            let parent = record.parent;
            self.release_ancestors(parent);
            self.processes.remove(&key);
        }
    }

    /// Drop one retain from every ancestor starting at `parent`, removing the
    /// tombstoned ones nothing depends on anymore.
    fn release_ancestors(&mut self, parent: Option<ProcessKey>) {
        let mut current = parent;
        while let Some(key) = current {
            let Some(ancestor) = self.processes.get_mut(&key) else {
                break;
            };
            ancestor.retain_count = ancestor.retain_count.saturating_sub(1);
            let next = ancestor.parent;
            if ancestor.tombstoned && !ancestor.is_retained() {
                // Its own claim on the rest of the chain goes away with it.
                self.release_ancestors(next);
                self.processes.remove(&key);
            }
            current = next;
        }
    }
}
