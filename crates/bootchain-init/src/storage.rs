//! RAID and LVM providers, plus the stand-in used for layers an image was
//! built without.

use bootchain_core::command::{resolve_binary, ExternalCommand};
use bootchain_core::error::{BootError, BootResult};
use bootchain_core::InitConfig;
use bootchain_provider::block::{ArrayProvider, VolumeProvider};
use bootchain_provider::luks::{BlockUnlocker, Credential, UnlockRequest};
use bootchain_provider::pool::{ImportRequest, PoolProvider};
use bootchain_provider::Subsystem;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Software RAID through `mdadm`.
pub(crate) struct MdadmProvider {
    mdadm: ExternalCommand,
    conf: PathBuf,
}

impl MdadmProvider {
    pub(crate) fn from_config(config: &InitConfig) -> BootResult<Self> {
        let binary = resolve_binary(config.tools.mdadm.as_deref(), "mdadm")?;
        Ok(Self::new(
            binary,
            config.paths.mdadm_conf.clone(),
            config.command_timeout(),
        ))
    }

    pub(crate) fn new(binary: PathBuf, conf: PathBuf, timeout: Duration) -> Self {
        Self {
            mdadm: ExternalCommand::new(binary, Subsystem::Raid, timeout),
            conf,
        }
    }
}

impl ArrayProvider for MdadmProvider {
    type Error = BootError;

    fn scan_and_persist(&self) -> BootResult<()> {
        let out = self.mdadm.run_checked(&["--examine", "--scan"], None)?;
        if let Some(parent) = self.conf.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.conf, &out.stdout[..])?;
        debug!("wrote array layout to {}", self.conf.display());
        Ok(())
    }

    fn assemble(&self) -> BootResult<()> {
        self.mdadm.run_checked(&["--assemble", "--scan"], None)?;
        Ok(())
    }
}

/// LVM through the multi-call `lvm` binary.
pub(crate) struct LvmProvider {
    lvm: ExternalCommand,
}

impl LvmProvider {
    pub(crate) fn from_config(config: &InitConfig) -> BootResult<Self> {
        let binary = resolve_binary(config.tools.lvm.as_deref(), "lvm")?;
        Ok(Self::new(binary, config.command_timeout()))
    }

    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self {
            lvm: ExternalCommand::new(binary, Subsystem::Lvm, timeout),
        }
    }
}

impl VolumeProvider for LvmProvider {
    type Error = BootError;

    fn activate_all(&self) -> BootResult<()> {
        self.lvm.run_checked(&["vgchange", "-ay"], None)?;
        Ok(())
    }

    fn make_nodes(&self) -> BootResult<()> {
        self.lvm.run_checked(&["vgscan", "--mknodes"], None)?;
        Ok(())
    }
}

/// Placeholder for a storage layer whose feature is off in this image.
///
/// The trigger pipeline never dispatches to a disabled layer; reaching one
/// of these methods means the feature gate was bypassed.
pub(crate) struct Disabled(pub(crate) Subsystem);

impl Disabled {
    fn error(&self) -> BootError {
        BootError::subsystem(self.0, format!("{} support is not enabled in this image", self.0))
    }
}

impl BlockUnlocker for Disabled {
    type Error = BootError;

    fn mapping_active(&self, _name: &str) -> BootResult<bool> {
        Err(self.error())
    }

    fn unlock(&self, _request: &UnlockRequest<'_>, _credential: Credential<'_>) -> BootResult<()> {
        Err(self.error())
    }
}

impl ArrayProvider for Disabled {
    type Error = BootError;

    fn scan_and_persist(&self) -> BootResult<()> {
        Err(self.error())
    }

    fn assemble(&self) -> BootResult<()> {
        Err(self.error())
    }
}

impl VolumeProvider for Disabled {
    type Error = BootError;

    fn activate_all(&self) -> BootResult<()> {
        Err(self.error())
    }

    fn make_nodes(&self) -> BootResult<()> {
        Err(self.error())
    }
}

impl PoolProvider for Disabled {
    type Error = BootError;

    fn import(&self, _request: &ImportRequest<'_>) -> BootResult<()> {
        Err(self.error())
    }

    fn export(&self, _pool: &str) -> BootResult<()> {
        Err(self.error())
    }

    fn mount_dataset(&self, _dataset: &str, _target: &Path, _options: &str) -> BootResult<()> {
        Err(self.error())
    }

    fn unmount(&self, _target: &Path) -> BootResult<()> {
        Err(self.error())
    }

    fn settle(&self) -> BootResult<()> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn write_executable(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn mdadm_scan_output_is_persisted() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("mdadm.log");
        let binary = dir.path().join("mdadm");
        write_executable(
            &binary,
            &format!(
                "#!/bin/sh\necho \"$*\" >> \"{}\"\n[ \"$1\" = \"--examine\" ] && echo 'ARRAY /dev/md0 UUID=aa:bb'\nexit 0\n",
                log.display()
            ),
        );
        let conf = dir.path().join("etc/mdadm.conf");
        let provider = MdadmProvider::new(binary, conf.clone(), Duration::from_secs(10));

        provider.scan_and_persist().unwrap();
        provider.assemble().unwrap();

        assert_eq!(
            fs::read_to_string(&conf).unwrap(),
            "ARRAY /dev/md0 UUID=aa:bb\n"
        );
        assert_eq!(
            fs::read_to_string(&log).unwrap(),
            "--examine --scan\n--assemble --scan\n"
        );
    }

    #[test]
    fn lvm_failure_is_a_subsystem_error() {
        let dir = tempdir().unwrap();
        let binary = dir.path().join("lvm");
        write_executable(
            &binary,
            "#!/bin/sh\necho '  No volume groups found' 1>&2\nexit 5\n",
        );
        let provider = LvmProvider::new(binary, Duration::from_secs(10));

        match provider.activate_all() {
            Err(BootError::Subsystem { subsystem, message }) => {
                assert_eq!(subsystem, Subsystem::Lvm);
                assert!(message.contains("vgchange -ay"));
                assert!(message.contains("No volume groups found"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn disabled_layer_names_itself() {
        let err = PoolProvider::settle(&Disabled(Subsystem::Zfs)).unwrap_err();
        assert!(err.to_string().contains("zfs support is not enabled"));
    }
}
