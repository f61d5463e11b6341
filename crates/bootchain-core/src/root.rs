//! Mounting of the real root (and optional /usr) under the new root.

use crate::config::InitConfig;
use crate::error::BootResult;
use crate::params::BootConfig;
use crate::pool::copy_atomic;
use crate::provider::Services;
use crate::resolver::DeviceResolver;
use crate::triggers::TriggerKind;
use log::{debug, info, warn};
use std::path::Path;

pub struct RootMounter<'a> {
    services: Services<'a>,
    config: &'a InitConfig,
    resolver: DeviceResolver,
}

impl<'a> RootMounter<'a> {
    pub fn new(services: Services<'a>, config: &'a InitConfig) -> Self {
        Self {
            services,
            config,
            resolver: DeviceResolver::new(&config.paths.disk_dir),
        }
    }

    /// Whether `root` names a pool dataset rather than a block device.
    pub fn uses_pool(&self, boot: &BootConfig) -> bool {
        self.config.features.zfs && boot.triggers.contains(&TriggerKind::Pool)
    }

    pub fn mount_root(&self, boot: &BootConfig) -> BootResult<()> {
        let target = &self.config.paths.new_root;
        self.mount_spec(boot, &boot.root, target)?;
        info!("mounted root {} at {}", boot.root, target.display());

        if self.uses_pool(boot) {
            self.persist_cache(boot);
        }
        Ok(())
    }

    /// Mount `usr=` at `<new_root>/usr`. A no-op when no /usr was requested.
    pub fn mount_usr(&self, boot: &BootConfig) -> BootResult<()> {
        let Some(usr) = boot.usr.as_deref() else {
            return Ok(());
        };
        let target = self.config.paths.new_root.join("usr");
        self.mount_spec(boot, usr, &target)?;
        info!("mounted /usr {usr} at {}", target.display());
        Ok(())
    }

    fn mount_spec(&self, boot: &BootConfig, spec: &str, target: &Path) -> BootResult<()> {
        if self.uses_pool(boot) {
            let pools = self.services.pools;
            if let Err(err) = pools.settle() {
                debug!("pool settle call failed: {err}");
            }
            return pools.mount_dataset(spec, target, &boot.options);
        }

        let device = self.resolver.resolve(spec);
        self.services
            .platform
            .mount(&device, target, None, &boot.options)
    }

    /// Seed the new root with the cache used for this boot.
    fn persist_cache(&self, boot: &BootConfig) {
        let paths = &self.config.paths;
        let dest = paths.new_root.join(paths.rootfs_cache_relative());
        if !boot.refresh && dest.exists() {
            return;
        }
        if !paths.zpool_cache.is_file() {
            warn!(
                "no local cache at {}; not copying it into the new root",
                paths.zpool_cache.display()
            );
            return;
        }
        match copy_atomic(&paths.zpool_cache, &dest) {
            Ok(()) => info!("installed cache at {}", dest.display()),
            Err(err) => warn!("failed to install cache at {}: {err}", dest.display()),
        }
    }
}
