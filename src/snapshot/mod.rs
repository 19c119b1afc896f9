//! One shot view of the process tree, seeded from procfs.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use lineage_common::time::Timestamp;
use lineage_core::{
    Pid,
    file::{FileCacheConfig, FileIdentityCache},
    process::{ProcessKey, ProcessRecord},
    process_source::ProcfsProcessSource,
    process_tree::{ProcessTree, ProcessTreeConfig},
};

use crate::{cli::LineageOpts, config::LineageConfig};

mod term_print;

pub use term_print::{TermPrintable, TermPrinted};

/// A process as displayed in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRow {
    pub key: ProcessKey,
    pub image: String,
    /// Time since the process started, if known.
    pub age: Option<Duration>,
    pub retain_count: u32,
    pub tombstoned: bool,
    /// Image names of the ancestors, closest first.
    pub parents: Vec<String>,
}

impl ProcessRow {
    fn new(tree: &ProcessTree, record: &ProcessRecord, now: Timestamp) -> Self {
        let image = match record.file().path() {
            "" => format!("[{}]", record.file().name()),
            path => path.to_string(),
        };
        Self {
            key: record.key(),
            image,
            age: record.start_time().map(|start| Duration::from(now - start)),
            retain_count: record.retain_count(),
            tombstoned: record.is_tombstoned(),
            parents: tree.parent_names(&record.key()),
        }
    }
}

/// Rows for every registered process, ordered by key.
pub fn process_rows(tree: &ProcessTree, now: Timestamp) -> Vec<ProcessRow> {
    tree.processes()
        .iter()
        .map(|record| ProcessRow::new(tree, record, now))
        .collect()
}

/// Rows for `key` and its ancestors, closest first.
pub fn ancestry_rows(
    tree: &ProcessTree,
    key: &ProcessKey,
    now: Timestamp,
) -> Option<Vec<ProcessRow>> {
    let record = tree.get(key)?;
    let mut rows = vec![ProcessRow::new(tree, &record, now)];
    rows.extend(
        tree.ancestors(key)
            .iter()
            .map(|ancestor| ProcessRow::new(tree, ancestor, now)),
    );
    Some(rows)
}

pub fn run(options: &LineageOpts) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        log::warn!("Not running as root, images of other users' processes won't be readable");
    }

    let config = LineageConfig::load(options.config_file.as_deref())?;
    log::debug!("Configuration loaded from {}", config.config_file().display());
    let file_cache_config = FileCacheConfig::try_from(&config.get_section("file_cache"))
        .context("Invalid [file_cache] configuration")?;
    let tree_config = ProcessTreeConfig::try_from(&config.get_section("process_tree"))
        .context("Invalid [process_tree] configuration")?;

    let file_cache = Arc::new(FileIdentityCache::new(&file_cache_config));
    let source = ProcfsProcessSource::new(file_cache.clone());
    let tree = ProcessTree::from_config(&tree_config, &source);
    log::debug!("{} files cached", file_cache.cache().len());

    let now = Timestamp::now();
    let rows = match options.pid {
        Some(pid) => {
            // Seeded processes have no pid version
            let key = ProcessKey::new(Pid::from_raw(pid), 0);
            match ancestry_rows(&tree, &key, now) {
                Some(rows) => rows,
                None => bail!("Process {pid} not found"),
            }
        }
        None => process_rows(&tree, now),
    };
    rows.term_print()?;

    Ok(())
}
