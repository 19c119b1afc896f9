//! Per-file metadata and the cache used to avoid recomputing it.
//!
//! Hashing an executable or checking its signature is expensive, and the same
//! images are executed over and over. [`FileIdentityCache`] memoizes a
//! [`FileInfo`] per path, but only trusts a hit when the file observed now is
//! still the one that was cached: same device, inode and modification time.
//! A path deleted and recreated, or a file replaced by a move, is a miss.

use std::{
    io,
    os::unix::fs::MetadataExt,
    path::Path,
    sync::{Arc, OnceLock, RwLock},
    time::Duration,
};

use crate::{
    cache::{BoundedCache, DEFAULT_TTL, MemoryPressure},
    config::{ConfigError, SectionConfig},
};

/// Default number of files kept by [`FileIdentityCache`].
pub const DEFAULT_COUNT_LIMIT: usize = 20_000;

/// Stat information identifying a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub dev: u64,
    pub ino: u64,
    /// Modification time, seconds since epoch.
    pub mtime: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

impl FileMetadata {
    /// Stat `path` without following a final symlink.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        std::fs::symlink_metadata(path).map(|metadata| Self::from(&metadata))
    }

    /// True if both describe the same version of the same file.
    pub fn same_identity(&self, other: &FileMetadata) -> bool {
        self.dev == other.dev && self.ino == other.ino && self.mtime == other.mtime
    }
}

impl From<&std::fs::Metadata> for FileMetadata {
    fn from(metadata: &std::fs::Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
            mtime: metadata.mtime(),
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.size(),
        }
    }
}

/// Code signing identity of an executable, as reported by the signature
/// verifier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub team_id: Option<String>,
    pub signing_id: Option<String>,
}

/// A file backing a process image.
#[derive(Debug)]
pub struct FileInfo {
    path: String,
    name: String,
    /// Lightweight entries never compute their hash.
    lightweight: bool,
    metadata: RwLock<Option<FileMetadata>>,
    sha256: OnceLock<Option<String>>,
    signature: Option<Signature>,
}

impl FileInfo {
    /// Build a file entry with the given metadata.
    pub fn with_metadata(path: impl Into<String>, metadata: Option<FileMetadata>) -> Self {
        let path = path.into();
        let name = Path::new(&path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        Self {
            path,
            name,
            lightweight: false,
            metadata: RwLock::new(metadata),
            sha256: OnceLock::new(),
            signature: None,
        }
    }

    /// Build a file entry, reading its metadata from disk.
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let metadata = FileMetadata::from_path(&path)
            .map_err(|err| log::debug!("stat {path}: {err}"))
            .ok();
        Self::with_metadata(path, metadata)
    }

    /// Entry that never touches the file contents.
    pub fn lightweight(path: impl Into<String>) -> Self {
        Self {
            lightweight: true,
            ..Self::with_metadata(path, None)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_lightweight(&self) -> bool {
        self.lightweight
    }

    pub fn metadata(&self) -> Option<FileMetadata> {
        *self.metadata.read().unwrap()
    }

    /// Replace the metadata. Safe to call while other threads read it.
    pub fn set_metadata(&self, metadata: FileMetadata) {
        *self.metadata.write().unwrap() = Some(metadata);
    }

    /// Hex encoded sha256 of the file contents, computed on first access.
    pub fn sha256(&self) -> Option<&str> {
        self.sha256
            .get_or_init(|| {
                if self.lightweight {
                    return None;
                }
                sha256::try_digest(Path::new(&self.path))
                    .map_err(|err| log::debug!("hashing {}: {err}", self.path))
                    .ok()
            })
            .as_deref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }
}

/// Typed view of the `[file_cache]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCacheConfig {
    pub count_limit: usize,
    pub cost_limit: usize,
    pub ttl: Duration,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            count_limit: DEFAULT_COUNT_LIMIT,
            cost_limit: usize::MAX,
            ttl: DEFAULT_TTL,
        }
    }
}

impl TryFrom<&SectionConfig> for FileCacheConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        Ok(FileCacheConfig {
            count_limit: config.with_default("count_limit", DEFAULT_COUNT_LIMIT)?,
            cost_limit: config.with_default("cost_limit", usize::MAX)?,
            ttl: Duration::from_secs(config.with_default("ttl_secs", DEFAULT_TTL.as_secs())?),
        })
    }
}

/// Path keyed cache of [`FileInfo`], validated against fresh stat data.
pub struct FileIdentityCache {
    cache: Arc<BoundedCache<String, Arc<FileInfo>>>,
    ttl: Duration,
}

impl FileIdentityCache {
    pub fn new(config: &FileCacheConfig) -> Self {
        Self {
            cache: Arc::new(BoundedCache::new(config.cost_limit, config.count_limit)),
            ttl: config.ttl,
        }
    }

    /// Return the cached entry for `path` only if it still describes the
    /// file observed now. On a hit the cached metadata is refreshed, as
    /// fields outside the identity (mode, owner, size) may have changed.
    pub fn lookup(&self, path: &str, observed: &FileMetadata) -> Option<Arc<FileInfo>> {
        let Some(cached) = self.cache.get(&path.to_string()) else {
            log::debug!("File not cached. {path}");
            return None;
        };
        match cached.metadata() {
            Some(metadata) if metadata.same_identity(observed) => {
                cached.set_metadata(*observed);
                Some(cached)
            }
            _ => {
                log::debug!("File has been modified. {path}");
                None
            }
        }
    }

    /// Return the cached entry for `path` without validating it.
    pub fn lookup_unchecked(&self, path: &str) -> Option<Arc<FileInfo>> {
        self.cache.get(&path.to_string())
    }

    pub fn store(&self, path: impl Into<String>, file: Arc<FileInfo>) {
        self.cache.put(path.into(), file, 0, self.ttl);
    }

    pub fn invalidate(&self, path: &str) -> Option<Arc<FileInfo>> {
        self.cache.remove(&path.to_string())
    }

    /// Return the validated entry for `path`, building and storing a new one
    /// on a miss. Without observed metadata the file is stat'ed now.
    pub fn resolve(&self, path: &str, observed: Option<FileMetadata>) -> Arc<FileInfo> {
        let observed = observed.or_else(|| FileMetadata::from_path(path).ok());
        if let Some(metadata) = observed {
            if let Some(cached) = self.lookup(path, &metadata) {
                return cached;
            }
        }
        let file = Arc::new(FileInfo::with_metadata(path, observed));
        // Entries without metadata could never be validated.
        if observed.is_some() {
            self.store(path, file.clone());
        }
        file
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    /// The underlying cache, to inspect it or change its limits.
    pub fn cache(&self) -> &BoundedCache<String, Arc<FileInfo>> {
        &self.cache
    }

    /// Clear the cache when `pressure` is signaled.
    pub fn watch_memory_pressure(&self, pressure: &MemoryPressure) -> tokio::task::JoinHandle<()> {
        self.cache.watch_memory_pressure(pressure)
    }
}

impl Default for FileIdentityCache {
    fn default() -> Self {
        Self::new(&FileCacheConfig::default())
    }
}
