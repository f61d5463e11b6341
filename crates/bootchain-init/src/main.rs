//! `/init` for bootchain initramfs images.
//!
//! Runs as PID 1: unlocks and assembles storage, mounts the real root, and
//! hands off to its init. Every failure path ends in a rescue shell.

use anyhow::{Context, Result};
use bootchain_core::error::BootError;
use bootchain_core::provider::{ArrayProvider, BlockUnlocker, PoolProvider, VolumeProvider};
use bootchain_core::{logging, BootOutcome, BootSequencer, InitConfig, Services};
use bootchain_luks::SystemLuksProvider;
use bootchain_provider::Subsystem;
use bootchain_zfs::SystemZfsProvider;
use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};

mod mounts;
mod platform;
mod prompt;
mod storage;

use platform::{rescue_loop, SystemPlatform, FALLBACK_SHELL};
use prompt::ConsolePrompt;
use storage::{Disabled, LvmProvider, MdadmProvider};

/// Command-line options. The kernel forwards unrecognised boot parameters
/// as arguments, so anything else is accepted and ignored.
#[derive(Parser, Debug, Default)]
#[command(
    name = "bootchain-init",
    version,
    about = "Unlock, assemble, and mount the real root, then switch to it.",
    ignore_errors = true
)]
struct Cli {
    /// Path to the image configuration file
    /// (defaults to BOOTCHAIN_CONFIG or /etc/bootchain/init.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use this kernel command line instead of /proc/cmdline.
    #[arg(long)]
    cmdline: Option<String>,

    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    passthrough: Vec<String>,
}

fn main() {
    logging::init("info");
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        warn!("ignoring unusable arguments: {err}");
        Cli::default()
    });

    if let Err(err) = run(cli) {
        rescue_loop(Path::new(FALLBACK_SHELL), &format!("{err:#}"));
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(InitConfig::default_path);
    let config = InitConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;
    if let Some(path) = &config.path {
        info!("loaded configuration from {}", path.display());
    }

    let platform = SystemPlatform::from_config(&config, cli.cmdline)
        .context("failed to prepare the boot platform")?;
    let prompt = ConsolePrompt;

    let unlocker: Box<dyn BlockUnlocker<Error = BootError>> = if config.features.luks {
        Box::new(SystemLuksProvider::from_config(&config).context("luks support unavailable")?)
    } else {
        Box::new(Disabled(Subsystem::Luks))
    };
    let arrays: Box<dyn ArrayProvider<Error = BootError>> = if config.features.raid {
        Box::new(MdadmProvider::from_config(&config).context("raid support unavailable")?)
    } else {
        Box::new(Disabled(Subsystem::Raid))
    };
    let volumes: Box<dyn VolumeProvider<Error = BootError>> = if config.features.lvm {
        Box::new(LvmProvider::from_config(&config).context("lvm support unavailable")?)
    } else {
        Box::new(Disabled(Subsystem::Lvm))
    };
    let pools: Box<dyn PoolProvider<Error = BootError>> = if config.features.zfs {
        Box::new(SystemZfsProvider::from_config(&config).context("zfs support unavailable")?)
    } else {
        Box::new(Disabled(Subsystem::Zfs))
    };

    let services = Services {
        platform: &platform,
        prompt: &prompt,
        unlocker: unlocker.as_ref(),
        arrays: arrays.as_ref(),
        volumes: volumes.as_ref(),
        pools: pools.as_ref(),
    };

    match BootSequencer::new(services, &config).boot() {
        BootOutcome::HandedOff => info!("handed off to the real init"),
        BootOutcome::RecoveryRequested => info!("recovery shell finished"),
        BootOutcome::Rescued(err) => warn!("rescue shell finished after: {err}"),
    }
    // The system platform never returns from switch_root or the rescue
    // shell; getting here means one of them did, so keep a shell up.
    rescue_loop(platform_shell(&config), "boot sequence returned unexpectedly")
}

fn platform_shell(config: &InitConfig) -> &Path {
    config
        .tools
        .shell
        .as_deref()
        .map(Path::new)
        .unwrap_or_else(|| Path::new(FALLBACK_SHELL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_passthrough_arguments_are_ignored() {
        let cli = Cli::try_parse_from([
            "bootchain-init",
            "--cmdline",
            "root=/dev/sda3",
            "single",
            "splash",
        ])
        .unwrap();
        assert_eq!(cli.cmdline.as_deref(), Some("root=/dev/sda3"));
        assert!(cli.config.is_none());
        assert_eq!(cli.passthrough, vec!["single", "splash"]);
    }

    #[test]
    fn configured_shell_is_used_for_the_last_resort() {
        let mut config = InitConfig::default();
        assert_eq!(platform_shell(&config), Path::new("/bin/sh"));
        config.tools.shell = Some("/usr/bin/ash".into());
        assert_eq!(platform_shell(&config), Path::new("/usr/bin/ash"));
    }
}
