//! Runtime core of the lineage agent.
//!
//! - [`process_tree`] keeps a live model of every process on the host, built
//!   from fork, exec and exit notifications reported by several independent
//!   observers.
//! - [`cache`] is a bounded LRU cache with per entry cost and TTL, used by
//!   [`file`] to memoize per-file metadata (hash, signature, stat).
//!
//! A single [`process_tree::ProcessTree`] is constructed by the service and
//! shared with its collaborators, usually behind an `Arc`.

pub mod cache;
pub mod config;
pub mod event;
pub mod file;
pub mod ingest;
pub mod process;
pub mod process_source;
pub mod process_tree;

pub use lineage_common::{Pid, time::Timestamp};
