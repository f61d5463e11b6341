//! Pool import with cache recovery and a device-directory fallback search.
//!
//! The cheapest route is importing from a cache artifact. When there is no
//! usable cache the pool is searched for device directory by device
//! directory, in a fixed order, until one import succeeds.

use crate::config::Paths;
use crate::error::{BootError, BootResult};
use crate::params::BootConfig;
use crate::provider::{ImportRequest, PoolProvider};
use log::{debug, info, warn};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Everything the importer needs to know about one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolImportState {
    pub pool: String,
    /// Dataset holding the root filesystem.
    pub root_dataset: String,
    pub local_cache: PathBuf,
    /// Cache location inside a mounted root filesystem, relative to it.
    pub rootfs_cache: PathBuf,
    pub by: Option<PathBuf>,
    pub refresh: bool,
}

impl PoolImportState {
    pub fn new(boot: &BootConfig, paths: &Paths) -> Self {
        Self {
            pool: boot.pool_name().to_string(),
            root_dataset: boot.root.clone(),
            local_cache: paths.zpool_cache.clone(),
            rootfs_cache: paths.rootfs_cache_relative(),
            by: boot.by.clone(),
            refresh: boot.refresh,
        }
    }
}

/// How the pool was eventually imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRoute {
    Cache,
    Directory(PathBuf),
}

pub struct PoolImporter<'a> {
    pools: &'a dyn PoolProvider<Error = BootError>,
    device_dir: PathBuf,
    disk_dir: PathBuf,
    temp_mount: PathBuf,
}

impl<'a> PoolImporter<'a> {
    pub fn new(pools: &'a dyn PoolProvider<Error = BootError>, paths: &Paths) -> Self {
        Self {
            pools,
            device_dir: paths.device_dir.clone(),
            disk_dir: paths.disk_dir.clone(),
            temp_mount: paths.temp_mount.clone(),
        }
    }

    /// Import the pool, preferring the cache artifact.
    pub fn import(&self, state: &PoolImportState) -> BootResult<ImportRoute> {
        if state.refresh {
            info!("refresh requested; not recovering the cache from {}", state.pool);
        } else if let Err(err) = self.recover_cache(state) {
            warn!("could not recover cache from pool {}: {err}", state.pool);
        }

        if state.local_cache.is_file() {
            let request = ImportRequest::new(&state.pool).cache_file(&state.local_cache);
            match self.pools.import(&request) {
                Ok(()) => {
                    info!(
                        "imported {} using cache {}",
                        state.pool,
                        state.local_cache.display()
                    );
                    return Ok(ImportRoute::Cache);
                }
                Err(err) => {
                    warn!(
                        "cache import of {} failed ({err}); removing {}",
                        state.pool,
                        state.local_cache.display()
                    );
                    if let Err(err) = remove_if_present(&state.local_cache) {
                        warn!("failed to remove {}: {err}", state.local_cache.display());
                    }
                }
            }
        }

        self.search(state)
    }

    /// Directories tried when no explicit by-directory was given: the device
    /// directory itself, then every `by-*` directory under the disk root in
    /// sorted order.
    pub fn candidate_dirs(&self) -> Vec<PathBuf> {
        let mut by_dirs: Vec<PathBuf> = match fs::read_dir(&self.disk_dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_name().to_string_lossy().starts_with("by-"))
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect(),
            Err(err) => {
                debug!("cannot list {}: {err}", self.disk_dir.display());
                Vec::new()
            }
        };
        by_dirs.sort();

        let mut dirs = Vec::with_capacity(by_dirs.len() + 1);
        dirs.push(self.device_dir.clone());
        dirs.extend(by_dirs);
        dirs
    }

    fn search(&self, state: &PoolImportState) -> BootResult<ImportRoute> {
        let candidates = match &state.by {
            Some(dir) => vec![dir.clone()],
            None => self.candidate_dirs(),
        };

        let mut tried = Vec::with_capacity(candidates.len());
        for dir in candidates {
            let request = ImportRequest::new(&state.pool).search_dir(Some(dir.as_path()));
            match self.pools.import(&request) {
                Ok(()) => {
                    info!("imported {} from {}", state.pool, dir.display());
                    return Ok(ImportRoute::Directory(dir));
                }
                Err(err) => {
                    debug!("import of {} from {} failed: {err}", state.pool, dir.display());
                    tried.push(dir);
                }
            }
        }

        Err(BootError::FallbackExhausted {
            pool: state.pool.clone(),
            tried,
        })
    }

    /// Pull the cache artifact out of the pool's own root filesystem.
    fn recover_cache(&self, state: &PoolImportState) -> BootResult<()> {
        let request = ImportRequest::new(&state.pool)
            .search_dir(state.by.as_deref())
            .read_only();
        self.pools.import(&request)?;

        let copied = self.copy_from_snapshot(state);
        self.settle();
        let exported = self.pools.export(&state.pool);
        copied.and(exported)
    }

    fn copy_from_snapshot(&self, state: &PoolImportState) -> BootResult<()> {
        self.settle();
        self.pools
            .mount_dataset(&state.root_dataset, &self.temp_mount, "ro")?;

        let source = self.temp_mount.join(&state.rootfs_cache);
        let copied = copy_cache(&source, &state.local_cache);

        self.settle();
        let unmounted = self.pools.unmount(&self.temp_mount);
        copied.and(unmounted)
    }

    fn settle(&self) {
        if let Err(err) = self.pools.settle() {
            debug!("pool settle call failed: {err}");
        }
    }
}

fn copy_cache(source: &Path, dest: &Path) -> BootResult<()> {
    if !source.is_file() {
        warn!("no cache found at {}", source.display());
        return Ok(());
    }
    copy_atomic(source, dest)?;
    info!("recovered cache {} -> {}", source.display(), dest.display());
    Ok(())
}

/// Copy `source` to `dest` through a temporary file in the destination
/// directory, so a reader never sees a half-written cache.
pub(crate) fn copy_atomic(source: &Path, dest: &Path) -> BootResult<()> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut input = fs::File::open(source)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    io::copy(&mut input, temp.as_file_mut())?;
    temp.as_file_mut().flush()?;
    let _ = temp.as_file().sync_all();

    temp.persist(dest).map_err(|err| BootError::Io(err.error))?;
    let _ = fs::File::open(parent).and_then(|dir| dir.sync_all());
    Ok(())
}

fn remove_if_present(path: &Path) -> BootResult<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(BootError::Io(err)),
        _ => Ok(()),
    }
}
