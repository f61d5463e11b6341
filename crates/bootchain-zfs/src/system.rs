//! System-backed `PoolProvider` implementation driving the host ZFS tools.

use crate::command::{export_args, import_args, mount_args, settle_args};
use bootchain_core::command::{non_empty_diagnostic, resolve_binary, ExternalCommand};
use bootchain_core::error::{BootError, BootResult};
use bootchain_core::InitConfig;
use bootchain_provider::pool::{ImportRequest, PoolProvider};
use bootchain_provider::Subsystem;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Binaries the provider shells out to.
#[derive(Debug, Clone)]
pub struct ZfsTools {
    pub zpool: PathBuf,
    pub zfs: PathBuf,
    pub mount: PathBuf,
    pub umount: PathBuf,
}

impl ZfsTools {
    /// Resolve every tool, honouring explicit paths from the configuration.
    pub fn resolve(config: &InitConfig) -> BootResult<Self> {
        let tools = &config.tools;
        Ok(Self {
            zpool: resolve_binary(tools.zpool.as_deref(), "zpool")?,
            zfs: resolve_binary(tools.zfs.as_deref(), "zfs")?,
            mount: resolve_binary(tools.mount.as_deref(), "mount")?,
            umount: resolve_binary(tools.umount.as_deref(), "umount")?,
        })
    }
}

/// Pool provider backed by `zpool`, `zfs`, and `mount -t zfs`.
#[derive(Debug, Clone)]
pub struct SystemZfsProvider {
    zpool: ExternalCommand,
    zfs: ExternalCommand,
    mount: ExternalCommand,
    umount: ExternalCommand,
}

impl SystemZfsProvider {
    pub fn from_config(config: &InitConfig) -> BootResult<Self> {
        Ok(Self::new(ZfsTools::resolve(config)?, config.command_timeout()))
    }

    pub fn new(tools: ZfsTools, timeout: Duration) -> Self {
        let command = |binary| ExternalCommand::new(binary, Subsystem::Zfs, timeout);
        Self {
            zpool: command(tools.zpool),
            zfs: command(tools.zfs),
            mount: command(tools.mount),
            umount: command(tools.umount),
        }
    }

    fn run(&self, command: &ExternalCommand, args: &[String], action: &str) -> BootResult<()> {
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = command.run(&argv, None)?;
        if out.success() {
            return Ok(());
        }
        Err(BootError::subsystem(
            Subsystem::Zfs,
            format!(
                "{action} failed: {} (exit code {})",
                non_empty_diagnostic(&out),
                out.status
            ),
        ))
    }
}

impl PoolProvider for SystemZfsProvider {
    type Error = BootError;

    fn import(&self, request: &ImportRequest<'_>) -> BootResult<()> {
        debug!("zpool {}", import_args(request).join(" "));
        let action = match (request.cache_file, request.search_dir) {
            (Some(cache), _) => format!(
                "importing pool `{}` from cache {}",
                request.pool,
                cache.display()
            ),
            (None, Some(dir)) => format!(
                "importing pool `{}` from {}",
                request.pool,
                dir.display()
            ),
            (None, None) => format!("importing pool `{}`", request.pool),
        };
        self.run(&self.zpool, &import_args(request), &action)
    }

    fn export(&self, pool: &str) -> BootResult<()> {
        self.run(
            &self.zpool,
            &export_args(pool),
            &format!("exporting pool `{pool}`"),
        )
    }

    fn mount_dataset(&self, dataset: &str, target: &Path, options: &str) -> BootResult<()> {
        fs::create_dir_all(target)?;
        self.run(
            &self.mount,
            &mount_args(dataset, target, options),
            &format!("mounting `{dataset}` at {}", target.display()),
        )
    }

    fn unmount(&self, target: &Path) -> BootResult<()> {
        self.run(
            &self.umount,
            &[target.to_string_lossy().into_owned()],
            &format!("unmounting {}", target.display()),
        )
    }

    fn settle(&self) -> BootResult<()> {
        self.run(&self.zfs, &settle_args(), "listing datasets")
    }
}
