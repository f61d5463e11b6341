//! Provider contract for the pool filesystem (ZFS).

use std::error::Error;
use std::path::Path;

/// Parameters for a single pool import attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportRequest<'a> {
    /// Pool to import.
    pub pool: &'a str,
    /// Restrict device discovery to this directory.
    pub search_dir: Option<&'a Path>,
    /// Import using a previously recorded cache artifact instead of scanning.
    pub cache_file: Option<&'a Path>,
    /// Import read-only without recording a new cache artifact.
    pub read_only: bool,
}

impl<'a> ImportRequest<'a> {
    pub fn new(pool: &'a str) -> Self {
        Self {
            pool,
            search_dir: None,
            cache_file: None,
            read_only: false,
        }
    }

    pub fn search_dir(mut self, dir: Option<&'a Path>) -> Self {
        self.search_dir = dir;
        self
    }

    pub fn cache_file(mut self, cache: &'a Path) -> Self {
        self.cache_file = Some(cache);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Abstraction over the pool-filesystem tooling.
pub trait PoolProvider {
    type Error: Error + Send + Sync + 'static;

    /// Import a pool without mounting any of its datasets.
    fn import(&self, request: &ImportRequest<'_>) -> Result<(), Self::Error>;

    /// Export a previously imported pool.
    fn export(&self, pool: &str) -> Result<(), Self::Error>;

    /// Mount `dataset` at `target` with pool-aware semantics.
    fn mount_dataset(&self, dataset: &str, target: &Path, options: &str)
        -> Result<(), Self::Error>;

    /// Unmount a dataset previously mounted at `target`.
    fn unmount(&self, target: &Path) -> Result<(), Self::Error>;

    /// Issue the no-op listing call that must precede every mount, unmount,
    /// and export. Without it the following operation intermittently reports
    /// the device as busy.
    fn settle(&self) -> Result<(), Self::Error>;
}
