//! Provider contracts used by the boot engine.
//!
//! Concrete implementations live in `bootchain-luks`, `bootchain-zfs`, and the
//! `bootchain-init` binary. The traits themselves come from
//! `bootchain-provider`; this module bundles them for the engine.

use crate::error::BootError;

pub use bootchain_provider::block::{ArrayProvider, VolumeProvider};
pub use bootchain_provider::luks::{BlockUnlocker, Credential, UnlockRequest};
pub use bootchain_provider::platform::Platform;
pub use bootchain_provider::pool::{ImportRequest, PoolProvider};
pub use bootchain_provider::prompt::CredentialPrompt;
pub use bootchain_provider::Subsystem;

/// Every external service the engine talks to, borrowed for one boot.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub platform: &'a dyn Platform<Error = BootError>,
    pub prompt: &'a dyn CredentialPrompt<Error = BootError>,
    pub unlocker: &'a dyn BlockUnlocker<Error = BootError>,
    pub arrays: &'a dyn ArrayProvider<Error = BootError>,
    pub volumes: &'a dyn VolumeProvider<Error = BootError>,
    pub pools: &'a dyn PoolProvider<Error = BootError>,
}
