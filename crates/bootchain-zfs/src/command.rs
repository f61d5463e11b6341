//! Argument builders for `zpool`, `zfs`, and `mount`.
//!
//! Kept free of process handling so the exact command lines can be checked
//! without any binaries present.

use bootchain_provider::pool::ImportRequest;
use std::path::Path;

/// Mount option that lets `mount -t zfs` accept datasets whose
/// `mountpoint` property is not `legacy`.
const ZFSUTIL: &str = "zfsutil";

/// `zpool import` arguments for one attempt.
///
/// Imports are forced (`-f`) because the pool was last used by another
/// kernel and never mount datasets (`-N`); the root dataset is mounted
/// separately under the new root.
pub(crate) fn import_args(request: &ImportRequest<'_>) -> Vec<String> {
    let mut args = vec!["import".to_string(), "-f".to_string(), "-N".to_string()];
    if request.read_only {
        args.extend(["-o", "readonly=on", "-o", "cachefile=none"].map(String::from));
    }
    if let Some(dir) = request.search_dir {
        args.push("-d".to_string());
        args.push(path_arg(dir));
    }
    if let Some(cache) = request.cache_file {
        args.push("-c".to_string());
        args.push(path_arg(cache));
    }
    args.push(request.pool.to_string());
    args
}

pub(crate) fn export_args(pool: &str) -> Vec<String> {
    vec!["export".to_string(), pool.to_string()]
}

pub(crate) fn mount_args(dataset: &str, target: &Path, options: &str) -> Vec<String> {
    vec![
        "-t".to_string(),
        "zfs".to_string(),
        "-o".to_string(),
        mount_options(options),
        dataset.to_string(),
        path_arg(target),
    ]
}

/// Listing used as the settle call before mounts, unmounts, and exports.
pub(crate) fn settle_args() -> Vec<String> {
    ["list", "-H", "-o", "name"].map(String::from).to_vec()
}

fn mount_options(options: &str) -> String {
    let mut merged = vec![ZFSUTIL];
    merged.extend(
        options
            .split(',')
            .map(str::trim)
            .filter(|opt| !opt.is_empty() && *opt != ZFSUTIL),
    );
    merged.join(",")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
