//! Lineage keeps a live model of every process running on a host, for an
//! endpoint security agent to resolve the ancestry of the processes it
//! observes.
//!
//! The model itself lives in [`lineage_core`]:
//!
//! - a [process tree](lineage_core::process_tree) built from fork, exec and
//!   exit events reported by several independent observers, each with its
//!   own latency. Exits are applied only once every observer has moved past
//!   them, so late events still find their ancestors.
//! - a [file identity cache](lineage_core::file) memoizing hashes and
//!   signatures of executables, trusted only while the file on disk is
//!   unchanged.
//!
//! This crate provides the `lineage` binary, which seeds a tree from procfs
//! and prints it:
//!
//! ```sh
//! # Every process with its ancestors
//! lineage
//!
//! # Ancestry of a single process
//! lineage --pid 4242
//! ```
//!
//! ## Configuration
//!
//! Settings are read from an INI file, `/var/lib/lineage/lineage.ini` unless
//! `--config-file` is given:
//!
//! ```ini
//! [file_cache]
//! count_limit=20000
//! ttl_secs=604800
//!
//! [process_tree]
//! clients=auth,notify
//! ```

pub mod cli;
pub mod config;
pub mod snapshot;
pub mod utils;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. We log from info level and above, hide timestamp
/// and module path.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder().filter_level(level_filter).init();
    }
}
