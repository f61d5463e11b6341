//! Linux implementation of the boot platform.
//!
//! Virtual filesystems and mount moves go straight through `nix`; mounts of
//! real filesystems use the `mount` binary so the filesystem type can be
//! probed. Device management is delegated to udev.

use crate::mounts::{find_mount_point, DEFAULT_MOUNT_TABLE};
use bootchain_core::command::{non_empty_diagnostic, resolve_binary, ExternalCommand};
use bootchain_core::error::{BootError, BootResult};
use bootchain_core::{InitConfig, Paths};
use bootchain_provider::platform::Platform;
use bootchain_provider::Subsystem;
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::mount::{mount, umount, umount2, MntFlags, MsFlags};
use std::fs;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

pub(crate) const FALLBACK_SHELL: &str = "/bin/sh";
const CMDLINE_PATH: &str = "/proc/cmdline";

/// Executables the platform needs at boot.
#[derive(Debug, Clone)]
pub(crate) struct PlatformTools {
    pub(crate) modprobe: PathBuf,
    pub(crate) udevd: PathBuf,
    pub(crate) udevadm: PathBuf,
    pub(crate) mount: PathBuf,
    pub(crate) shell: PathBuf,
    pub(crate) switch_root: PathBuf,
}

impl PlatformTools {
    pub(crate) fn resolve(config: &InitConfig) -> BootResult<Self> {
        let tools = &config.tools;
        Ok(Self {
            modprobe: resolve_binary(tools.modprobe.as_deref(), "modprobe")?,
            udevd: resolve_binary(tools.udevd.as_deref(), "udevd")?,
            udevadm: resolve_binary(tools.udevadm.as_deref(), "udevadm")?,
            mount: resolve_binary(tools.mount.as_deref(), "mount")?,
            shell: resolve_binary(tools.shell.as_deref(), "sh")?,
            switch_root: resolve_binary(tools.switch_root.as_deref(), "switch_root")?,
        })
    }
}

/// Virtual filesystem mounted during setup.
struct VirtualMount {
    source: &'static str,
    fstype: &'static str,
    target: PathBuf,
    flags: MsFlags,
    data: Option<&'static str>,
}

pub(crate) struct SystemPlatform {
    modprobe: ExternalCommand,
    udevd: ExternalCommand,
    udevadm: ExternalCommand,
    mount: ExternalCommand,
    shell: PathBuf,
    switch_root: PathBuf,
    paths: Paths,
    cmdline_override: Option<String>,
    mount_table: PathBuf,
}

impl SystemPlatform {
    pub(crate) fn from_config(
        config: &InitConfig,
        cmdline_override: Option<String>,
    ) -> BootResult<Self> {
        let tools = PlatformTools::resolve(config)?;
        Ok(Self::new(tools, config, cmdline_override))
    }

    pub(crate) fn new(
        tools: PlatformTools,
        config: &InitConfig,
        cmdline_override: Option<String>,
    ) -> Self {
        let timeout = config.command_timeout();
        Self {
            modprobe: ExternalCommand::new(tools.modprobe, Subsystem::Modules, timeout),
            udevd: ExternalCommand::new(tools.udevd, Subsystem::Devices, timeout),
            udevadm: ExternalCommand::new(tools.udevadm, Subsystem::Devices, timeout),
            mount: ExternalCommand::new(tools.mount, Subsystem::Mount, timeout),
            shell: tools.shell,
            switch_root: tools.switch_root,
            paths: config.paths.clone(),
            cmdline_override,
            mount_table: PathBuf::from(DEFAULT_MOUNT_TABLE),
        }
    }

    #[cfg(test)]
    fn with_mount_table(mut self, table: PathBuf) -> Self {
        self.mount_table = table;
        self
    }

    fn virtual_mounts(&self) -> [VirtualMount; 4] {
        let hardened = MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC;
        [
            VirtualMount {
                source: "proc",
                fstype: "proc",
                target: PathBuf::from("/proc"),
                flags: hardened,
                data: None,
            },
            VirtualMount {
                source: "sysfs",
                fstype: "sysfs",
                target: PathBuf::from("/sys"),
                flags: hardened,
                data: None,
            },
            VirtualMount {
                source: "devtmpfs",
                fstype: "devtmpfs",
                target: self.paths.device_dir.clone(),
                flags: MsFlags::MS_NOSUID,
                data: Some("mode=0755"),
            },
            VirtualMount {
                source: "tmpfs",
                fstype: "tmpfs",
                target: self.paths.run_dir.clone(),
                flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                data: Some("mode=0755"),
            },
        ]
    }

    fn run_shell(&self) -> BootResult<()> {
        let status = Command::new(&self.shell).status().map_err(|err| {
            BootError::subsystem(
                Subsystem::Shell,
                format!("failed to start {}: {err}", self.shell.display()),
            )
        })?;
        debug!("shell exited with {status}");
        Ok(())
    }
}

fn mount_failure(action: &str, target: &Path, err: Errno) -> BootError {
    BootError::subsystem(
        Subsystem::Mount,
        format!("{action} {} failed: {}", target.display(), err.desc()),
    )
}

impl Platform for SystemPlatform {
    type Error = BootError;

    fn setup_environment(&self) -> BootResult<()> {
        for vfs in self.virtual_mounts() {
            fs::create_dir_all(&vfs.target)?;
            match mount(
                Some(vfs.source),
                &vfs.target,
                Some(vfs.fstype),
                vfs.flags,
                vfs.data,
            ) {
                Ok(()) => debug!("mounted {} at {}", vfs.fstype, vfs.target.display()),
                Err(Errno::EBUSY) => debug!("{} already mounted", vfs.target.display()),
                Err(err) => return Err(mount_failure("mounting", &vfs.target, err)),
            }
        }
        Ok(())
    }

    fn read_cmdline(&self) -> BootResult<String> {
        if let Some(cmdline) = &self.cmdline_override {
            return Ok(cmdline.clone());
        }
        Ok(fs::read_to_string(CMDLINE_PATH)?.trim().to_string())
    }

    fn load_modules(&self, modules: &[String]) -> BootResult<()> {
        let mut failed = Vec::new();
        for module in modules {
            let out = self.modprobe.run(&[module.as_str()], None)?;
            if out.success() {
                debug!("loaded module {module}");
            } else {
                warn!("modprobe {module}: {}", non_empty_diagnostic(&out));
                failed.push(module.as_str());
            }
        }
        if failed.is_empty() {
            return Ok(());
        }
        Err(BootError::subsystem(
            Subsystem::Modules,
            format!("could not load {}", failed.join(", ")),
        ))
    }

    fn start_device_daemon(&self) -> BootResult<()> {
        self.udevd
            .run_checked(&["--daemon", "--resolve-names=never"], None)?;
        Ok(())
    }

    fn settle_devices(&self) -> BootResult<()> {
        self.udevadm
            .run_checked(&["trigger", "--action=add", "--type=subsystems"], None)?;
        self.udevadm
            .run_checked(&["trigger", "--action=add", "--type=devices"], None)?;
        self.udevadm.run_checked(&["settle"], None)?;
        Ok(())
    }

    fn stop_device_daemon(&self) -> BootResult<()> {
        self.udevadm.run_checked(&["control", "--exit"], None)?;
        Ok(())
    }

    fn teardown_environment(&self) -> BootResult<()> {
        for vfs in self.virtual_mounts().iter().rev() {
            if vfs.target == self.paths.run_dir {
                continue;
            }
            self.unmount_lazy(&vfs.target)?;
        }
        Ok(())
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: &str,
    ) -> BootResult<()> {
        fs::create_dir_all(target)?;
        let source_arg = source.to_string_lossy();
        let target_arg = target.to_string_lossy();
        let mut args: Vec<&str> = Vec::new();
        if let Some(fstype) = fstype {
            args.extend(["-t", fstype]);
        }
        if !options.is_empty() {
            args.extend(["-o", options]);
        }
        args.push(&source_arg);
        args.push(&target_arg);
        self.mount.run_checked(&args, None)?;
        Ok(())
    }

    fn move_mount(&self, source: &Path, target: &Path) -> BootResult<()> {
        fs::create_dir_all(target)?;
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_MOVE,
            None::<&str>,
        )
        .map_err(|err| mount_failure("moving mount to", target, err))
    }

    fn unmount(&self, target: &Path) -> BootResult<()> {
        umount(target).map_err(|err| mount_failure("unmounting", target, err))
    }

    fn unmount_lazy(&self, target: &Path) -> BootResult<()> {
        umount2(target, MntFlags::MNT_DETACH)
            .map_err(|err| mount_failure("detaching", target, err))
    }

    fn mount_point_of(&self, device: &Path) -> BootResult<Option<PathBuf>> {
        find_mount_point(&self.mount_table, device)
    }

    fn single_user_shell(&self) -> BootResult<()> {
        self.run_shell()
    }

    fn rescue_shell(&self, reason: &str) {
        rescue_loop(&self.shell, reason)
    }

    fn switch_root(&self, new_root: &Path, init: &Path) -> BootResult<()> {
        let err = Command::new(&self.switch_root)
            .arg(new_root)
            .arg(init)
            .exec();
        Err(BootError::subsystem(
            Subsystem::Shell,
            format!("exec {} failed: {err}", self.switch_root.display()),
        ))
    }
}

/// Keep a shell on the console forever. PID 1 must never exit.
pub(crate) fn rescue_loop(shell: &Path, reason: &str) -> ! {
    error!("{reason}");
    loop {
        info!("starting rescue shell; fix the problem and reboot");
        match Command::new(shell).status() {
            Ok(status) => warn!("rescue shell exited with {status}; restarting"),
            Err(err) => {
                error!("failed to start {}: {err}", shell.display());
                if shell != Path::new(FALLBACK_SHELL) {
                    rescue_loop(Path::new(FALLBACK_SHELL), reason);
                }
                std::thread::sleep(std::time::Duration::from_secs(5));
            }
        }
    }
}
