//! Configuration contract for a [`Barrel`](crate::barrel::Barrel) instance.
//!
//! Mirrors the builder-over-a-defaults-struct shape of the teacher's
//! `storage::bitcask::Config`, but over the option set this engine's spec calls for.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default threshold at which the active file is rotated: 1 GiB.
pub const DEFAULT_FILE_SIZE_LIMIT: u64 = 1024 * 1024 * 1024;

/// Options controlling how a [`Barrel`](crate::barrel::Barrel) instance behaves.
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) dir: PathBuf,
    pub(crate) read_only: bool,
    pub(crate) debug: bool,
    pub(crate) auto_sync: bool,
    pub(crate) always_fsync_on_put: bool,
    pub(crate) sync_interval: Option<Duration>,
    pub(crate) check_file_size_interval: Duration,
    pub(crate) file_size_limit: u64,
    pub(crate) compact_interval: Option<Duration>,
    pub(crate) concurrency: usize,
}

impl Options {
    /// Starts building options for a database rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            read_only: false,
            debug: false,
            auto_sync: false,
            always_fsync_on_put: false,
            sync_interval: None,
            check_file_size_interval: Duration::from_secs(5),
            file_size_limit: DEFAULT_FILE_SIZE_LIMIT,
            compact_interval: Some(Duration::from_secs(180)),
            concurrency: num_cpus::get(),
        }
    }

    /// Open without permitting writes; skips lock file creation. Default `false`.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Enable verbose logging. Default `false`.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Call `sync` after every successful write. Default `false`.
    pub fn auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Synonym/refinement of `auto_sync`; both gate the same post-append `sync`. Default
    /// `false`.
    pub fn always_fsync_on_put(mut self, always_fsync_on_put: bool) -> Self {
        self.always_fsync_on_put = always_fsync_on_put;
        self
    }

    /// If set, a background worker calls `sync` on this cadence. Default: disabled.
    pub fn sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Cadence for checking whether the active file should be rotated. Default `5s`.
    pub fn check_file_size_interval(mut self, interval: Duration) -> Self {
        self.check_file_size_interval = interval;
        self
    }

    /// Byte threshold at which the active file is rotated. Default `1GiB`.
    pub fn file_size_limit(mut self, limit: u64) -> Self {
        self.file_size_limit = limit;
        self
    }

    /// Cadence of background compaction. `None` disables background compaction. Default
    /// `180s`.
    pub fn compact_interval(mut self, interval: Option<Duration>) -> Self {
        self.compact_interval = interval;
        self
    }

    /// Whether a post-write `sync` should happen, under either spelling of the option.
    pub(crate) fn sync_on_every_write(&self) -> bool {
        self.auto_sync || self.always_fsync_on_put
    }

    /// Max number of concurrent readers kept warm in the reader pool. Default: the number of
    /// logical cores, mirroring the teacher's `Config::concurrency`.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}
