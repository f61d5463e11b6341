//! Translation of `SCHEME=value` device specifiers into device paths.

use std::path::PathBuf;

pub const DEFAULT_DISK_DIR: &str = "/dev/disk";

const SCHEMES: &[(&str, &str)] = &[
    ("ID", "by-id"),
    ("UUID", "by-uuid"),
    ("PARTUUID", "by-partuuid"),
    ("LABEL", "by-label"),
    ("PARTLABEL", "by-partlabel"),
];

/// Resolves device specifiers against a disk symlink root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResolver {
    disk_dir: PathBuf,
}

impl Default for DeviceResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DISK_DIR)
    }
}

impl DeviceResolver {
    pub fn new(disk_dir: impl Into<PathBuf>) -> Self {
        Self {
            disk_dir: disk_dir.into(),
        }
    }

    /// Map `UUID=abcd` style specifiers to `<disk_dir>/by-uuid/abcd`.
    ///
    /// Anything without a recognised scheme, or with an empty value, is
    /// returned as a literal path.
    pub fn resolve(&self, spec: &str) -> PathBuf {
        let parts = spec.split_once('=').filter(|(_, value)| !value.is_empty());
        if let Some((scheme, value)) = parts {
            if let Some((_, dir)) = SCHEMES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(scheme))
            {
                return self.disk_dir.join(dir).join(value);
            }
        }
        PathBuf::from(spec)
    }
}

/// Resolve `spec` against the default `/dev/disk` root.
pub fn resolve_device(spec: &str) -> PathBuf {
    DeviceResolver::default().resolve(spec)
}
