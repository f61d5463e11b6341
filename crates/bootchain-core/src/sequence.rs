//! The end-to-end boot sequence, from a bare initramfs to the real init.

use crate::config::{relative_to_root, InitConfig};
use crate::error::{BootError, BootResult};
use crate::logging;
use crate::params::BootConfig;
use crate::provider::Services;
use crate::root::RootMounter;
use crate::triggers::TriggerPipeline;
use log::{debug, error, info, warn};
use std::error::Error as _;
use std::fs;

/// How a boot attempt ended.
///
/// System platforms never let `boot` return because both `switch_root` and
/// the rescue shell replace or outlive the process. The variants are what
/// mock platforms observe.
#[derive(Debug)]
pub enum BootOutcome {
    HandedOff,
    RecoveryRequested,
    Rescued(BootError),
}

pub struct BootSequencer<'a> {
    services: Services<'a>,
    config: &'a InitConfig,
}

impl<'a> BootSequencer<'a> {
    pub fn new(services: Services<'a>, config: &'a InitConfig) -> Self {
        Self { services, config }
    }

    /// Run the whole sequence. Any fatal error ends in the rescue shell.
    pub fn boot(self) -> BootOutcome {
        match self.run() {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("boot failed: {err}");
                let mut source = err.source();
                while let Some(cause) = source {
                    error!("  caused by: {cause}");
                    source = cause.source();
                }
                self.services.platform.rescue_shell(&err.to_string());
                BootOutcome::Rescued(err)
            }
        }
    }

    fn run(&self) -> BootResult<BootOutcome> {
        let platform = self.services.platform;

        platform.setup_environment()?;
        let cmdline = platform.read_cmdline()?;
        if let Some(level) = logging::apply_cmdline_level(&cmdline) {
            debug!("log level set to {level} from the kernel command line");
        }
        let mut boot = BootConfig::from_cmdline(&cmdline)?;
        debug!("boot configuration: {boot:?}");

        if let Err(err) = platform.load_modules(&self.config.modules) {
            warn!("module loading reported errors: {err}");
        }
        platform.start_device_daemon()?;
        platform.settle_devices()?;

        if boot.recover {
            info!("recovery requested on the kernel command line");
            platform.rescue_shell("recovery requested");
            return Ok(BootOutcome::RecoveryRequested);
        }

        if boot.redetect {
            self.services
                .prompt
                .read_line("Attach any remaining devices, then press enter to rescan: ")?;
            platform.settle_devices()?;
        }

        TriggerPipeline::new(self.services, self.config).run(&mut boot)?;

        let mounter = RootMounter::new(self.services, self.config);
        mounter.mount_root(&boot)?;
        mounter.mount_usr(&boot)?;

        if boot.single_user {
            info!("entering single-user shell; exit to continue booting");
            platform.single_user_shell()?;
        }

        platform.stop_device_daemon()?;
        platform.teardown_environment()?;

        let paths = &self.config.paths;
        let new_root = &paths.new_root;
        let run_target = new_root.join("run");
        if let Err(err) = platform.move_mount(&paths.run_dir, &run_target) {
            warn!(
                "could not carry {} into the new root: {err}",
                paths.run_dir.display()
            );
        }

        let init = new_root.join(relative_to_root(&boot.init));
        if fs::symlink_metadata(&init).is_err() {
            return Err(BootError::device_not_found("init", init));
        }

        info!(
            "switching to {} inside {}",
            boot.init.display(),
            new_root.display()
        );
        platform.switch_root(new_root, &boot.init)?;
        Ok(BootOutcome::HandedOff)
    }
}
