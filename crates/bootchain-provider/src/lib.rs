#![forbid(unsafe_code)]

//! Contracts for the external subsystems bootchain drives during early boot.
//!
//! The orchestration engine in `bootchain-core` only talks to these traits. The
//! system integrations live in `bootchain-luks`, `bootchain-zfs`, and the
//! `bootchain-init` binary, which keeps the engine testable with in-memory mocks.

pub mod block;
pub mod luks;
pub mod platform;
pub mod pool;
pub mod prompt;

use std::fmt;

pub use block::{ArrayProvider, VolumeProvider};
pub use luks::{BlockUnlocker, Credential, UnlockRequest};
pub use platform::Platform;
pub use pool::{ImportRequest, PoolProvider};
pub use prompt::CredentialPrompt;

/// Identifies which external subsystem produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Luks,
    Gpg,
    Raid,
    Lvm,
    Zfs,
    Mount,
    Devices,
    Modules,
    Shell,
}

impl Subsystem {
    pub fn as_str(self) -> &'static str {
        match self {
            Subsystem::Luks => "luks",
            Subsystem::Gpg => "gpg",
            Subsystem::Raid => "raid",
            Subsystem::Lvm => "lvm",
            Subsystem::Zfs => "zfs",
            Subsystem::Mount => "mount",
            Subsystem::Devices => "devices",
            Subsystem::Modules => "modules",
            Subsystem::Shell => "shell",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
