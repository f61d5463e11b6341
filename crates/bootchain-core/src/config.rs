//! Build-time configuration baked into the initramfs image.
//!
//! Boot decisions come from the kernel command line; this file only records
//! what the image was built with (enabled features, tool locations, paths).
//! It is read once at startup and never written.

use crate::error::{BootError, BootResult};
use crate::triggers::TriggerKind;
use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bootchain/init.toml";
pub const CONFIG_ENV: &str = "BOOTCHAIN_CONFIG";

/// Top-level configuration snapshot loaded from the image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitConfig {
    #[serde(default)]
    pub features: Features,

    #[serde(default)]
    pub paths: Paths,

    #[serde(default)]
    pub tools: Tools,

    #[serde(default)]
    pub commands: CommandCfg,

    /// Kernel modules loaded before the device daemon starts.
    #[serde(default)]
    pub modules: Vec<String>,

    #[serde(skip)]
    pub path: Option<PathBuf>,
}

/// Which storage layers this image was built to handle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub luks: bool,

    #[serde(default)]
    pub raid: bool,

    #[serde(default)]
    pub lvm: bool,

    #[serde(default)]
    pub zfs: bool,
}

impl Features {
    /// Feature flag gating `kind`.
    pub fn enabled(&self, kind: TriggerKind) -> bool {
        match kind {
            TriggerKind::Decrypt => self.luks,
            TriggerKind::Raid => self.raid,
            TriggerKind::Lvm => self.lvm,
            TriggerKind::Pool => self.zfs,
        }
    }
}

/// Filesystem locations used during boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    #[serde(default = "default_new_root")]
    pub new_root: PathBuf,

    #[serde(default = "default_key_mount")]
    pub key_mount: PathBuf,

    #[serde(default = "default_temp_mount")]
    pub temp_mount: PathBuf,

    #[serde(default = "default_embedded_keyfile")]
    pub embedded_keyfile: PathBuf,

    #[serde(default = "default_zpool_cache")]
    pub zpool_cache: PathBuf,

    /// Cache location as seen from inside the real root filesystem.
    #[serde(default = "default_zpool_cache")]
    pub rootfs_cache: PathBuf,

    #[serde(default = "default_mdadm_conf")]
    pub mdadm_conf: PathBuf,

    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    #[serde(default = "default_device_dir")]
    pub device_dir: PathBuf,

    #[serde(default = "default_disk_dir")]
    pub disk_dir: PathBuf,
}

fn default_new_root() -> PathBuf {
    PathBuf::from("/mnt/root")
}

fn default_key_mount() -> PathBuf {
    PathBuf::from("/mnt/key")
}

fn default_temp_mount() -> PathBuf {
    PathBuf::from("/mnt/temp")
}

fn default_embedded_keyfile() -> PathBuf {
    PathBuf::from("/etc/keyfile")
}

fn default_zpool_cache() -> PathBuf {
    PathBuf::from("/etc/zfs/zpool.cache")
}

fn default_mdadm_conf() -> PathBuf {
    PathBuf::from("/etc/mdadm.conf")
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("/run")
}

fn default_device_dir() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_disk_dir() -> PathBuf {
    PathBuf::from("/dev/disk")
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            new_root: default_new_root(),
            key_mount: default_key_mount(),
            temp_mount: default_temp_mount(),
            embedded_keyfile: default_embedded_keyfile(),
            zpool_cache: default_zpool_cache(),
            rootfs_cache: default_zpool_cache(),
            mdadm_conf: default_mdadm_conf(),
            run_dir: default_run_dir(),
            device_dir: default_device_dir(),
            disk_dir: default_disk_dir(),
        }
    }
}

impl Paths {
    /// Location of the pool cache artifact relative to a root filesystem.
    pub fn rootfs_cache_relative(&self) -> PathBuf {
        relative_to_root(&self.rootfs_cache)
    }
}

/// Optional explicit locations for external tools. Unset entries are
/// discovered through well-known directories and `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tools {
    #[serde(default)]
    pub cryptsetup: Option<String>,

    #[serde(default)]
    pub gpg: Option<String>,

    #[serde(default)]
    pub zpool: Option<String>,

    #[serde(default)]
    pub zfs: Option<String>,

    #[serde(default)]
    pub mdadm: Option<String>,

    #[serde(default)]
    pub lvm: Option<String>,

    #[serde(default)]
    pub udevd: Option<String>,

    #[serde(default)]
    pub udevadm: Option<String>,

    #[serde(default)]
    pub modprobe: Option<String>,

    #[serde(default)]
    pub mount: Option<String>,

    #[serde(default)]
    pub umount: Option<String>,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub switch_root: Option<String>,
}

/// Limits applied to every external command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandCfg {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for CommandCfg {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl InitConfig {
    /// Resolve the configuration path, honouring `BOOTCHAIN_CONFIG`.
    pub fn default_path() -> PathBuf {
        env::var_os(CONFIG_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Read and parse a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> BootResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = toml::from_str::<Self>(&contents)?;
        cfg.path = Some(path.to_path_buf());

        let issues = cfg.validate();
        if !issues.is_empty() {
            return Err(BootError::InvalidConfig(format!(
                "{}: {}",
                path.display(),
                issues.join("; ")
            )));
        }
        Ok(cfg)
    }

    /// Load `path` if present, otherwise fall back to built-in defaults.
    ///
    /// An image without a feature file boots plain block-device roots only.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> BootResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        warn!(
            "no configuration at {}; booting with every storage feature disabled",
            path.display()
        );
        Ok(Self::default())
    }

    /// Return human-readable configuration problems.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.commands.timeout_secs == 0 {
            issues.push("commands.timeout_secs must be at least 1".to_string());
        }
        for (name, path) in [
            ("paths.new_root", &self.paths.new_root),
            ("paths.key_mount", &self.paths.key_mount),
            ("paths.temp_mount", &self.paths.temp_mount),
            ("paths.zpool_cache", &self.paths.zpool_cache),
            ("paths.rootfs_cache", &self.paths.rootfs_cache),
        ] {
            if !path.is_absolute() {
                issues.push(format!("{name} must be an absolute path"));
            }
        }
        if self.modules.iter().any(|module| module.trim().is_empty()) {
            issues.push("modules must not contain empty names".to_string());
        }
        issues
    }

    /// Translate the stored timeout into a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout_secs)
    }
}

/// Strip the leading `/` so `path` can be joined under another root.
pub fn relative_to_root(path: &Path) -> PathBuf {
    path.strip_prefix("/").unwrap_or(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = InitConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert!(!config.features.zfs);
        assert_eq!(config.paths.new_root, PathBuf::from("/mnt/root"));
        assert_eq!(config.command_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("init.toml");
        fs::write(
            &path,
            "modules = [\"dm_crypt\", \"zfs\"]\n\n[features]\nluks = true\nzfs = true\n\n[tools]\nzpool = \"/sbin/zpool\"\n",
        )
        .unwrap();

        let config = InitConfig::load(&path).unwrap();
        assert!(config.features.enabled(TriggerKind::Decrypt));
        assert!(config.features.enabled(TriggerKind::Pool));
        assert!(!config.features.enabled(TriggerKind::Raid));
        assert_eq!(config.modules, vec!["dm_crypt", "zfs"]);
        assert_eq!(config.tools.zpool.as_deref(), Some("/sbin/zpool"));
        assert_eq!(config.paths.key_mount, PathBuf::from("/mnt/key"));
        assert_eq!(config.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("init.toml");
        fs::write(&path, "[commands]\ntimeout_secs = 0\n\n[paths]\nnew_root = \"mnt\"\n").unwrap();

        match InitConfig::load(&path) {
            Err(BootError::InvalidConfig(message)) => {
                assert!(message.contains("timeout_secs"));
                assert!(message.contains("paths.new_root"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rootfs_cache_is_relative() {
        let paths = Paths::default();
        assert_eq!(
            paths.rootfs_cache_relative(),
            PathBuf::from("etc/zfs/zpool.cache")
        );
    }
}
