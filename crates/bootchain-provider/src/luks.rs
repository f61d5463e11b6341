//! Provider contract for unlocking LUKS-encrypted block devices.
//!
//! Unlocks happen inside the initramfs before any layered storage (RAID, LVM,
//! pools) can be discovered, so the contract is intentionally small: check
//! whether a mapping already exists and open one with a single credential.

use std::error::Error;
use std::fmt;
use std::path::Path;

/// Key material handed to the unlock service for one attempt.
#[derive(Clone, Copy)]
pub enum Credential<'a> {
    /// Passphrase bytes, piped to the unlock tool on stdin.
    Passphrase(&'a [u8]),
    /// Plain keyfile read directly by the unlock tool.
    Keyfile(&'a Path),
    /// GPG-encrypted keyfile. `passphrase` decrypts it and the plaintext key is
    /// piped to the unlock tool without touching disk.
    GpgKeyfile {
        keyfile: &'a Path,
        passphrase: &'a [u8],
    },
}

impl Credential<'_> {
    /// Short description safe to put in logs and error messages.
    pub fn describe(&self) -> String {
        match self {
            Credential::Passphrase(_) => "passphrase".to_string(),
            Credential::Keyfile(path) => format!("keyfile {}", path.display()),
            Credential::GpgKeyfile { keyfile, .. } => {
                format!("gpg-encrypted keyfile {}", keyfile.display())
            }
        }
    }
}

impl fmt::Debug for Credential<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Source device, mapping name, and extra tool options for one unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockRequest<'a> {
    /// Canonical encrypted block device (e.g. `/dev/sda2`).
    pub device: &'a Path,
    /// Mapping name the unlocked volume appears under (`/dev/mapper/<name>`).
    pub name: &'a str,
    /// Extra options forwarded verbatim to the unlock tool.
    pub options: &'a [String],
}

/// Abstraction over the block-unlock service.
pub trait BlockUnlocker {
    type Error: Error + Send + Sync + 'static;

    /// Return whether a mapping called `name` is already active.
    fn mapping_active(&self, name: &str) -> Result<bool, Self::Error>;

    /// Open `request.device` as `request.name` using `credential`.
    ///
    /// Implementations should report a rejected key distinctly from other
    /// failures so callers can decide whether asking again makes sense.
    fn unlock(
        &self,
        request: &UnlockRequest<'_>,
        credential: Credential<'_>,
    ) -> Result<(), Self::Error>;
}
