//! Contract for the operating-system plumbing around the boot sequence.
//!
//! Virtual filesystems, module loading, the device-event daemon, generic
//! mounts, shells, and the final root switch all sit behind this trait. They
//! are thin wrappers around OS primitives; the interesting decisions live in
//! `bootchain-core`.

use std::error::Error;
use std::path::{Path, PathBuf};

pub trait Platform {
    type Error: Error + Send + Sync + 'static;

    /// Mount `/proc`, `/sys`, `/dev`, and `/run` and prepare the console.
    fn setup_environment(&self) -> Result<(), Self::Error>;

    /// Return the raw kernel command line.
    fn read_cmdline(&self) -> Result<String, Self::Error>;

    /// Load the given kernel modules. Missing modules are not fatal.
    fn load_modules(&self, modules: &[String]) -> Result<(), Self::Error>;

    /// Start the background device-naming daemon.
    fn start_device_daemon(&self) -> Result<(), Self::Error>;

    /// Replay device events and wait until symlinks are populated.
    fn settle_devices(&self) -> Result<(), Self::Error>;

    /// Stop the device-naming daemon before handing off.
    fn stop_device_daemon(&self) -> Result<(), Self::Error>;

    /// Lazily unmount the virtual filesystems mounted by `setup_environment`,
    /// leaving `/run` in place so it can be moved into the new root.
    fn teardown_environment(&self) -> Result<(), Self::Error>;

    /// Mount `source` at `target`, letting the kernel detect the filesystem
    /// type unless `fstype` is given.
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: &str,
    ) -> Result<(), Self::Error>;

    /// Move the mount at `source` to `target`.
    fn move_mount(&self, source: &Path, target: &Path) -> Result<(), Self::Error>;

    /// Unmount `target`.
    fn unmount(&self, target: &Path) -> Result<(), Self::Error>;

    /// Detach `target` without waiting for it to become idle.
    fn unmount_lazy(&self, target: &Path) -> Result<(), Self::Error>;

    /// Return where `device` is currently mounted, if anywhere.
    fn mount_point_of(&self, device: &Path) -> Result<Option<PathBuf>, Self::Error>;

    /// Run an interactive single-user shell and return once it exits.
    fn single_user_shell(&self) -> Result<(), Self::Error>;

    /// Enter the rescue shell after a fatal error.
    ///
    /// System implementations never return; mocks may, so callers treat the
    /// boot as finished either way.
    fn rescue_shell(&self, reason: &str);

    /// Replace the current process with `init` running inside `new_root`.
    ///
    /// Returns only on failure (or from mocks).
    fn switch_root(&self, new_root: &Path, init: &Path) -> Result<(), Self::Error>;
}
