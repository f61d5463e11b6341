//! Ordered execution of the storage triggers.

use crate::config::InitConfig;
use crate::decrypt::DecryptionEngine;
use crate::error::BootResult;
use crate::params::BootConfig;
use crate::pool::{PoolImportState, PoolImporter};
use crate::provider::Services;
use log::{debug, info, warn};
use std::fmt;

/// One storage layer the initramfs can bring up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Decrypt,
    Raid,
    Lvm,
    Pool,
}

impl TriggerKind {
    /// Parse a `triggers=` entry. Both the layer name and the tool family
    /// name are accepted, in any case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "luks" | "decrypt" => Some(TriggerKind::Decrypt),
            "raid" | "mdadm" => Some(TriggerKind::Raid),
            "lvm" => Some(TriggerKind::Lvm),
            "zfs" | "pool" => Some(TriggerKind::Pool),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TriggerKind::Decrypt => "luks",
            TriggerKind::Raid => "raid",
            TriggerKind::Lvm => "lvm",
            TriggerKind::Pool => "zfs",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct TriggerPipeline<'a> {
    services: Services<'a>,
    config: &'a InitConfig,
}

impl<'a> TriggerPipeline<'a> {
    pub fn new(services: Services<'a>, config: &'a InitConfig) -> Self {
        Self { services, config }
    }

    /// Run every listed trigger whose feature is built into the image, in
    /// list order. Decrypt and pool failures abort; RAID and LVM failures
    /// are logged and skipped.
    pub fn run(&self, boot: &mut BootConfig) -> BootResult<()> {
        let order = boot.triggers.clone();
        for kind in order {
            if !self.config.features.enabled(kind) {
                debug!("{kind} support not built into this image; skipping");
                continue;
            }
            info!("running {kind} trigger");
            match kind {
                TriggerKind::Decrypt => {
                    DecryptionEngine::new(self.services, &self.config.paths)
                        .run(&mut boot.encryption)?;
                }
                TriggerKind::Raid => {
                    if let Err(err) = self.assemble_arrays() {
                        warn!("RAID assembly failed: {err}");
                    }
                }
                TriggerKind::Lvm => {
                    if let Err(err) = self.activate_volumes() {
                        warn!("LVM activation failed: {err}");
                    }
                }
                TriggerKind::Pool => {
                    let state = PoolImportState::new(boot, &self.config.paths);
                    PoolImporter::new(self.services.pools, &self.config.paths).import(&state)?;
                }
            }
        }
        Ok(())
    }

    fn assemble_arrays(&self) -> BootResult<()> {
        self.services.arrays.scan_and_persist()?;
        self.services.arrays.assemble()
    }

    fn activate_volumes(&self) -> BootResult<()> {
        self.services.volumes.activate_all()?;
        self.services.volumes.make_nodes()
    }
}
