//! System-backed `BlockUnlocker` implementation.
//!
//! Wraps `cryptsetup` for the mapping itself and `gpg` for encrypted
//! keyfiles. Decrypted key material only ever lives in memory and on the
//! cryptsetup stdin pipe.

use crate::command::{CryptsetupCommand, GpgCommand, KeySource};
use bootchain_core::command::resolve_binary;
use bootchain_core::error::{BootError, BootResult};
use bootchain_core::InitConfig;
use bootchain_provider::luks::{BlockUnlocker, Credential, UnlockRequest};
use bootchain_provider::Subsystem;
use log::{debug, warn};
use std::path::PathBuf;
use std::time::Duration;

/// System provider that opens LUKS mappings via the host `cryptsetup` binary.
#[derive(Debug, Clone)]
pub struct SystemLuksProvider {
    cryptsetup: CryptsetupCommand,
    gpg: Option<GpgCommand>,
}

impl SystemLuksProvider {
    /// Build a provider from configuration, resolving `cryptsetup` and, when
    /// available, `gpg`.
    ///
    /// A missing `gpg` is not an error here; only gpg-keyfile unlocks need it.
    pub fn from_config(config: &InitConfig) -> BootResult<Self> {
        let timeout = config.command_timeout();
        let cryptsetup = resolve_binary(config.tools.cryptsetup.as_deref(), "cryptsetup")?;
        let gpg = match resolve_binary(config.tools.gpg.as_deref(), "gpg") {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("gpg keyfiles will be unavailable: {err}");
                None
            }
        };
        Ok(Self::new(cryptsetup, gpg, timeout))
    }

    /// Build a provider around explicit binaries.
    pub fn new(cryptsetup: PathBuf, gpg: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            cryptsetup: CryptsetupCommand::new(cryptsetup, timeout),
            gpg: gpg.map(|path| GpgCommand::new(path, timeout)),
        }
    }

    /// Look for active mappings under `dir` instead of `/dev/mapper`.
    pub fn with_mapper_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cryptsetup = self.cryptsetup.with_mapper_dir(dir.into());
        self
    }

    fn gpg(&self) -> BootResult<&GpgCommand> {
        self.gpg.as_ref().ok_or_else(|| {
            BootError::subsystem(Subsystem::Gpg, "gpg binary not available in this image")
        })
    }
}

impl BlockUnlocker for SystemLuksProvider {
    type Error = BootError;

    fn mapping_active(&self, name: &str) -> BootResult<bool> {
        self.cryptsetup.mapping_active(name)
    }

    fn unlock(&self, request: &UnlockRequest<'_>, credential: Credential<'_>) -> BootResult<()> {
        let key_desc = credential.describe();
        debug!(
            "opening {} as {} with {key_desc}",
            request.device.display(),
            request.name
        );

        match credential {
            Credential::Passphrase(passphrase) => self.cryptsetup.open(
                request.device,
                request.name,
                KeySource::Stdin(passphrase),
                request.options,
                &key_desc,
            )?,
            Credential::Keyfile(path) => self.cryptsetup.open(
                request.device,
                request.name,
                KeySource::File(path),
                request.options,
                &key_desc,
            )?,
            Credential::GpgKeyfile {
                keyfile,
                passphrase,
            } => {
                let key = self.gpg()?.decrypt(keyfile, passphrase, request.name)?;
                self.cryptsetup.open(
                    request.device,
                    request.name,
                    KeySource::Stdin(&key[..]),
                    request.options,
                    &key_desc,
                )?
            }
        }

        if self.cryptsetup.mapping_active(request.name)? {
            Ok(())
        } else {
            Err(BootError::subsystem(
                Subsystem::Luks,
                format!(
                    "cryptsetup reported success opening `{}` but mapping `{}` is not active",
                    request.device.display(),
                    request.name
                ),
            ))
        }
    }
}
