//! Kernel command-line parsing into a structured boot configuration.
//!
//! Tokens are split on their first `=` and dispatched on the literal key.
//! Values are stored as plain strings; nothing is ever evaluated.

use crate::error::{BootError, BootResult};
use crate::triggers::TriggerKind;
use log::{debug, warn};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INIT: &str = "/sbin/init";
pub const DEFAULT_MOUNT_OPTIONS: &str = "rw";
pub const DEFAULT_TRIGGERS: &[TriggerKind] = &[
    TriggerKind::Decrypt,
    TriggerKind::Raid,
    TriggerKind::Lvm,
    TriggerKind::Pool,
];

const BY_DIRECTORIES: &[(&str, &str)] = &[
    ("dev", "/dev"),
    ("id", "/dev/disk/by-id"),
    ("uuid", "/dev/disk/by-uuid"),
    ("partuuid", "/dev/disk/by-partuuid"),
    ("label", "/dev/disk/by-label"),
    ("partlabel", "/dev/disk/by-partlabel"),
];

/// Boot configuration parsed from the kernel command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    /// Root device specifier, or `pool/dataset` when booting from a pool.
    pub root: String,
    pub options: String,
    pub usr: Option<String>,
    pub init: PathBuf,
    /// Device directory the pool import is restricted to (`by=`).
    pub by: Option<PathBuf>,
    pub refresh: bool,
    pub recover: bool,
    pub single_user: bool,
    pub redetect: bool,
    /// Execution order of the storage triggers.
    pub triggers: Vec<TriggerKind>,
    pub encryption: EncryptionConfig,
}

/// How encrypted drives are unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionKind {
    Passphrase,
    Keyfile,
    GpgKeyfile,
}

impl EncryptionKind {
    pub fn parse(value: &str) -> BootResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pass" | "passphrase" => Ok(EncryptionKind::Passphrase),
            "key" | "keyfile" => Ok(EncryptionKind::Keyfile),
            "key_gpg" | "gpg" => Ok(EncryptionKind::GpgKeyfile),
            other => Err(BootError::UserInput(format!(
                "unknown encryption type `{other}` (expected pass, key, or key_gpg)"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionKind::Passphrase => "pass",
            EncryptionKind::Keyfile => "key",
            EncryptionKind::GpgKeyfile => "key_gpg",
        }
    }

    /// Whether this kind reads key material from a file.
    pub fn uses_keyfile(self) -> bool {
        !matches!(self, EncryptionKind::Passphrase)
    }
}

impl fmt::Display for EncryptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unlock parameters. Fields left empty here are gathered interactively
/// before decryption starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// Raw `enc_type` value; validated when decryption starts.
    pub kind: Option<String>,
    /// Raw drive specifiers (`/dev/sda2`, `UUID=...`).
    pub drives: Vec<String>,
    /// Mapping names by drive index. Missing entries get `vault_<index>`.
    pub targets: Vec<String>,
    /// Extra unlock-tool options, comma separated on the command line.
    pub options: Vec<String>,
    pub key_drive: Option<String>,
    /// Keyfile path relative to the key drive.
    pub key: Option<String>,
    pub max_attempts: u32,
    pub ignore_embedded: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            kind: None,
            drives: Vec::new(),
            targets: Vec::new(),
            options: Vec::new(),
            key_drive: None,
            key: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            ignore_embedded: false,
        }
    }
}

impl EncryptionConfig {
    /// Validated encryption kind, if one has been provided.
    pub fn kind(&self) -> BootResult<Option<EncryptionKind>> {
        self.kind.as_deref().map(EncryptionKind::parse).transpose()
    }
}

impl BootConfig {
    /// Parse a raw kernel command line.
    pub fn from_cmdline(cmdline: &str) -> BootResult<Self> {
        Self::parse(cmdline.split_whitespace())
    }

    /// Parse whitespace-separated `key=value` or bare tokens.
    ///
    /// Unrecognised tokens are ignored. Later duplicates win. Fails when no
    /// non-empty `root` was supplied.
    pub fn parse<I, S>(tokens: I) -> BootResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = None;
        let mut config = BootConfig {
            root: String::new(),
            options: DEFAULT_MOUNT_OPTIONS.to_string(),
            usr: None,
            init: PathBuf::from(DEFAULT_INIT),
            by: None,
            refresh: false,
            recover: false,
            single_user: false,
            redetect: false,
            triggers: DEFAULT_TRIGGERS.to_vec(),
            encryption: EncryptionConfig::default(),
        };

        for token in tokens {
            let token = token.as_ref();
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (token, None),
            };
            let enc = &mut config.encryption;

            match (key, value) {
                ("root", Some(value)) => root = non_empty(value),
                ("options", Some(value)) => {
                    if let Some(options) = non_empty(value) {
                        config.options = options;
                    }
                }
                ("usr", Some(value)) => config.usr = non_empty(value),
                ("init", Some(value)) => {
                    if let Some(init) = non_empty(value) {
                        config.init = PathBuf::from(init);
                    }
                }
                ("by", Some(value)) => config.by = non_empty(value).map(|v| by_directory(&v)),
                ("triggers", Some(value)) => config.triggers = parse_triggers(value),
                ("enc_type", Some(value)) => enc.kind = non_empty(value),
                ("enc_drives", Some(value)) => enc.drives = split_list(value),
                ("enc_targets", Some(value)) => enc.targets = split_list(value),
                ("enc_options", Some(value)) => enc.options = split_list(value),
                ("enc_key", Some(value)) => enc.key = non_empty(value),
                ("enc_key_drive", Some(value)) => enc.key_drive = non_empty(value),
                ("enc_tries", Some(value)) => enc.max_attempts = parse_attempts(value),
                ("enc_key_ignore", _) => enc.ignore_embedded = true,
                ("refresh", _) => config.refresh = true,
                ("recover", _) => config.recover = true,
                ("su", _) => config.single_user = true,
                ("redetect", _) => config.redetect = true,
                _ => debug!("ignoring kernel parameter `{token}`"),
            }
        }

        config.root = root.ok_or_else(|| {
            BootError::UserInput(
                "no root device specified; add root=<device> to the kernel command line".into(),
            )
        })?;
        Ok(config)
    }

    /// Pool name for pool-backed roots: everything before the first `/`.
    pub fn pool_name(&self) -> &str {
        pool_name(&self.root)
    }
}

/// Everything in `root` before the first `/`.
pub fn pool_name(root: &str) -> &str {
    root.split('/').next().unwrap_or(root)
}

/// Map a `by=` value to its device directory. Unknown values are used as a
/// literal path.
pub fn by_directory(value: &str) -> PathBuf {
    BY_DIRECTORIES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, dir)| PathBuf::from(dir))
        .unwrap_or_else(|| PathBuf::from(value))
}

fn parse_triggers(value: &str) -> Vec<TriggerKind> {
    let mut triggers = Vec::new();
    for name in split_list(value) {
        match TriggerKind::from_name(&name) {
            Some(kind) if triggers.contains(&kind) => {
                debug!("trigger `{name}` listed twice; keeping the first position")
            }
            Some(kind) => triggers.push(kind),
            None => warn!("skipping unknown trigger `{name}`"),
        }
    }
    triggers
}

fn parse_attempts(value: &str) -> u32 {
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
        Ok(_) => DEFAULT_MAX_ATTEMPTS,
        Err(_) => {
            warn!("enc_tries=`{value}` is not a number; using {DEFAULT_MAX_ATTEMPTS}");
            DEFAULT_MAX_ATTEMPTS
        }
    }
}

pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_command_line() {
        let config = BootConfig::from_cmdline(
            "BOOT_IMAGE=/vmlinuz root=tank/ROOT/gentoo options=noatime usr=tank/USR \
             enc_drives=/dev/sda2,UUID=abcd enc_targets=crypt0 enc_type=key_gpg \
             enc_key=/keys/root.gpg enc_key_drive=LABEL=KEYS enc_options=--allow-discards \
             enc_key_ignore enc_tries=3 init=/lib/systemd/systemd by=ID refresh su redetect \
             triggers=zfs,luks quiet",
        )
        .unwrap();

        assert_eq!(config.root, "tank/ROOT/gentoo");
        assert_eq!(config.options, "noatime");
        assert_eq!(config.usr.as_deref(), Some("tank/USR"));
        assert_eq!(config.init, PathBuf::from("/lib/systemd/systemd"));
        assert_eq!(config.by, Some(PathBuf::from("/dev/disk/by-id")));
        assert!(config.refresh && config.single_user && config.redetect);
        assert!(!config.recover);
        assert_eq!(config.triggers, vec![TriggerKind::Pool, TriggerKind::Decrypt]);

        let enc = &config.encryption;
        assert_eq!(enc.kind().unwrap(), Some(EncryptionKind::GpgKeyfile));
        assert_eq!(enc.drives, vec!["/dev/sda2", "UUID=abcd"]);
        assert_eq!(enc.targets, vec!["crypt0"]);
        assert_eq!(enc.options, vec!["--allow-discards"]);
        assert_eq!(enc.key.as_deref(), Some("/keys/root.gpg"));
        assert_eq!(enc.key_drive.as_deref(), Some("LABEL=KEYS"));
        assert_eq!(enc.max_attempts, 3);
        assert!(enc.ignore_embedded);
    }

    #[test]
    fn root_value_keeps_embedded_equals() {
        let config = BootConfig::from_cmdline("root=UUID=1234-ABCD").unwrap();
        assert_eq!(config.root, "UUID=1234-ABCD");
    }

    #[test]
    fn missing_root_is_user_input_error() {
        let err = BootConfig::from_cmdline("quiet enc_type=pass").unwrap_err();
        assert!(matches!(err, BootError::UserInput(_)));

        let err = BootConfig::from_cmdline("root=").unwrap_err();
        assert!(matches!(err, BootError::UserInput(_)));
    }

    #[test]
    fn defaults_apply_when_keys_absent() {
        let config = BootConfig::from_cmdline("root=/dev/sda3").unwrap();
        assert_eq!(config.options, DEFAULT_MOUNT_OPTIONS);
        assert_eq!(config.init, PathBuf::from(DEFAULT_INIT));
        assert_eq!(config.triggers, DEFAULT_TRIGGERS.to_vec());
        assert_eq!(config.by, None);
        assert_eq!(config.encryption, EncryptionConfig::default());
    }

    #[test]
    fn by_values_map_case_insensitively() {
        let expected = [
            ("dev", "/dev"),
            ("ID", "/dev/disk/by-id"),
            ("Uuid", "/dev/disk/by-uuid"),
            ("PARTUUID", "/dev/disk/by-partuuid"),
            ("label", "/dev/disk/by-label"),
            ("PartLabel", "/dev/disk/by-partlabel"),
        ];
        for (input, dir) in expected {
            assert_eq!(by_directory(input), PathBuf::from(dir), "by={input}");
        }
        assert_eq!(by_directory("/dev/mapper"), PathBuf::from("/dev/mapper"));
        assert_eq!(by_directory("path"), PathBuf::from("path"));
    }

    #[test]
    fn enc_tries_resets_non_positive_values() {
        for (raw, expected) in [("0", 5), ("-2", 5), ("abc", 5), ("1", 1), ("7", 7)] {
            let config =
                BootConfig::from_cmdline(&format!("root=/dev/sda3 enc_tries={raw}")).unwrap();
            assert_eq!(config.encryption.max_attempts, expected, "enc_tries={raw}");
        }
    }

    #[test]
    fn unknown_triggers_are_skipped() {
        let config = BootConfig::from_cmdline("root=/dev/sda3 triggers=lvm,btrfs,,RAID").unwrap();
        assert_eq!(config.triggers, vec![TriggerKind::Lvm, TriggerKind::Raid]);
    }

    #[test]
    fn repeated_triggers_keep_first_position() {
        let config = BootConfig::from_cmdline("root=/dev/sda3 triggers=zfs,luks,pool").unwrap();
        assert_eq!(config.triggers, vec![TriggerKind::Pool, TriggerKind::Decrypt]);
    }

    #[test]
    fn later_duplicates_overwrite_earlier_values() {
        let config = BootConfig::from_cmdline("root=/dev/sda1 root=/dev/sda3 options=ro").unwrap();
        assert_eq!(config.root, "/dev/sda3");
        assert_eq!(config.options, "ro");
    }

    #[test]
    fn invalid_encryption_type_is_reported_on_use() {
        let config = BootConfig::from_cmdline("root=/dev/sda3 enc_type=fido").unwrap();
        assert!(matches!(
            config.encryption.kind(),
            Err(BootError::UserInput(_))
        ));
    }

    #[test]
    fn pool_name_stops_at_first_separator() {
        assert_eq!(pool_name("tank/ROOT/gentoo"), "tank");
        assert_eq!(pool_name("tank"), "tank");
        assert_eq!(pool_name("UUID=1234"), "UUID=1234");
    }
}
