//! Unlocking of encrypted drives before the rest of the storage stack comes up.
//!
//! A run has three phases: gather whatever the command line left out (asking
//! the operator when needed and mounting the key drive), unlock each drive
//! with a bounded number of attempts, then unmount the key drive again.

use crate::config::{relative_to_root, Paths};
use crate::error::{BootError, BootResult};
use crate::params::{split_list, EncryptionConfig, EncryptionKind};
use crate::provider::{Credential, Services, UnlockRequest};
use crate::resolver::DeviceResolver;
use crate::retry::bounded_retry;
use log::{debug, info, warn};
use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// An encrypted drive paired with the mapping name it will be opened as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDrive {
    pub device: PathBuf,
    pub name: String,
}

/// Lifecycle of a single drive during a decryption run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    AwaitingCredential,
    Attempting,
    Unlocked,
    Failed,
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriveState::AwaitingCredential => "awaiting-credential",
            DriveState::Attempting => "attempting",
            DriveState::Unlocked => "unlocked",
            DriveState::Failed => "failed",
        })
    }
}

/// Where key material lives for this run, and what must be unmounted after.
#[derive(Debug, Default)]
struct KeySession {
    keyfile: Option<PathBuf>,
    mounted: Option<PathBuf>,
}

impl KeySession {
    fn keyfile(&self) -> BootResult<&Path> {
        let keyfile = self
            .keyfile
            .as_deref()
            .ok_or_else(|| BootError::UserInput("no keyfile location given".into()))?;
        if !keyfile.is_file() {
            return Err(BootError::device_not_found("keyfile", keyfile));
        }
        Ok(keyfile)
    }
}

pub struct DecryptionEngine<'a> {
    services: Services<'a>,
    paths: &'a Paths,
    resolver: DeviceResolver,
}

impl<'a> DecryptionEngine<'a> {
    pub fn new(services: Services<'a>, paths: &'a Paths) -> Self {
        Self {
            services,
            paths,
            resolver: DeviceResolver::new(&paths.disk_dir),
        }
    }

    /// Unlock every configured drive, completing `enc` interactively first.
    ///
    /// The key drive stays mounted when unlocking fails so the rescue shell
    /// can inspect it.
    pub fn run(&self, enc: &mut EncryptionConfig) -> BootResult<Vec<ResolvedDrive>> {
        let session = self.prepare(enc)?;
        let drives = self.unlock_all(enc, &session)?;
        self.release(&session);
        Ok(drives)
    }

    /// Pair each drive specifier with its mapping name.
    ///
    /// Names come from `enc.targets` by position; drives without one are
    /// called `vault_<index>`.
    pub fn resolve_drives(&self, enc: &EncryptionConfig) -> BootResult<Vec<ResolvedDrive>> {
        if enc.drives.is_empty() {
            return Err(BootError::UserInput("no encrypted drives specified".into()));
        }
        Ok(enc
            .drives
            .iter()
            .enumerate()
            .map(|(index, spec)| ResolvedDrive {
                device: self.resolver.resolve(spec),
                name: enc
                    .targets
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("vault_{index}")),
            })
            .collect())
    }

    fn prepare(&self, enc: &mut EncryptionConfig) -> BootResult<KeySession> {
        let embedded = &self.paths.embedded_keyfile;
        if !enc.ignore_embedded && embedded.is_file() {
            match enc.kind()? {
                Some(EncryptionKind::Passphrase) => {
                    return Err(BootError::UserInput(format!(
                        "enc_type=pass cannot be used with the embedded keyfile {}; add enc_key_ignore to unlock with a passphrase",
                        embedded.display()
                    )))
                }
                Some(_) => {}
                None => enc.kind = Some(EncryptionKind::Keyfile.as_str().to_string()),
            }
            info!("using embedded keyfile {}", embedded.display());
            self.ask_drives(enc)?;
            return Ok(KeySession {
                keyfile: Some(embedded.clone()),
                mounted: None,
            });
        }

        self.ask_drives(enc)?;
        let kind = self.ask_kind(enc)?;
        if !kind.uses_keyfile() {
            return Ok(KeySession::default());
        }

        let key_drive = match enc.key_drive.clone() {
            Some(drive) => drive,
            None => {
                let drive = self.ask_required("Key drive (e.g. /dev/sdb1 or LABEL=KEYS): ")?;
                enc.key_drive = Some(drive.clone());
                drive
            }
        };
        let key = match enc.key.clone() {
            Some(key) => key,
            None => {
                let key = self.ask_required("Keyfile path on the key drive: ")?;
                enc.key = Some(key.clone());
                key
            }
        };

        let platform = self.services.platform;
        let device = self.resolver.resolve(&key_drive);
        let (mount_point, mounted) = match platform.mount_point_of(&device)? {
            Some(existing) => {
                info!(
                    "key drive {} already mounted at {}",
                    device.display(),
                    existing.display()
                );
                (existing, None)
            }
            None => {
                let target = self.paths.key_mount.clone();
                platform.mount(&device, &target, None, "ro")?;
                info!("mounted key drive {} at {}", device.display(), target.display());
                (target.clone(), Some(target))
            }
        };

        Ok(KeySession {
            keyfile: Some(mount_point.join(relative_to_root(Path::new(&key)))),
            mounted,
        })
    }

    fn ask_drives(&self, enc: &mut EncryptionConfig) -> BootResult<()> {
        if !enc.drives.is_empty() {
            return Ok(());
        }
        let line = self
            .services
            .prompt
            .read_line("Encrypted drives to unlock (comma separated): ")?;
        enc.drives = split_list(&line);
        if enc.drives.is_empty() {
            return Err(BootError::UserInput("no encrypted drives specified".into()));
        }
        Ok(())
    }

    fn ask_kind(&self, enc: &mut EncryptionConfig) -> BootResult<EncryptionKind> {
        if let Some(kind) = enc.kind()? {
            return Ok(kind);
        }
        let line = self
            .services
            .prompt
            .read_line("Encryption type (pass, key, key_gpg): ")?;
        let kind = EncryptionKind::parse(&line)?;
        enc.kind = Some(kind.as_str().to_string());
        Ok(kind)
    }

    fn ask_required(&self, prompt: &str) -> BootResult<String> {
        let answer = self.services.prompt.read_line(prompt)?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(BootError::UserInput(format!(
                "no answer given to `{}`",
                prompt.trim_end_matches([' ', ':'])
            )));
        }
        Ok(answer.to_string())
    }

    fn unlock_all(
        &self,
        enc: &EncryptionConfig,
        session: &KeySession,
    ) -> BootResult<Vec<ResolvedDrive>> {
        let kind = enc
            .kind()?
            .ok_or_else(|| BootError::UserInput("no encryption type specified".into()))?;
        let drives = self.resolve_drives(enc)?;

        for drive in &drives {
            if self.services.unlocker.mapping_active(&drive.name)? {
                info!("{} is already open; skipping", drive.name);
                continue;
            }
            self.unlock_drive(drive, kind, session, enc)?;
        }
        Ok(drives)
    }

    fn unlock_drive(
        &self,
        drive: &ResolvedDrive,
        kind: EncryptionKind,
        session: &KeySession,
        enc: &EncryptionConfig,
    ) -> BootResult<()> {
        let state = Cell::new(DriveState::AwaitingCredential);
        debug!("{}: {}", drive.name, state.get());

        let unlocker = self.services.unlocker;
        let request = UnlockRequest {
            device: &drive.device,
            name: &drive.name,
            options: &enc.options,
        };
        let attempting = || transition(drive, &state, DriveState::Attempting);

        info!(
            "unlocking {} as {} using {kind}",
            drive.device.display(),
            drive.name
        );
        let result = match kind {
            EncryptionKind::Passphrase => bounded_retry(
                &drive.name,
                enc.max_attempts,
                |attempt| {
                    self.read_secret(
                        drive,
                        &state,
                        attempt,
                        &format!(
                            "Enter passphrase for {} ({}): ",
                            drive.name,
                            drive.device.display()
                        ),
                    )
                },
                |passphrase, _| {
                    attempting();
                    unlocker.unlock(&request, Credential::Passphrase(passphrase.as_bytes()))
                },
            ),
            EncryptionKind::Keyfile => session.keyfile().and_then(|keyfile| {
                bounded_retry(
                    &drive.name,
                    1,
                    |_| Ok(()),
                    |_, _| {
                        attempting();
                        unlocker.unlock(&request, Credential::Keyfile(keyfile))
                    },
                )
            }),
            EncryptionKind::GpgKeyfile => session.keyfile().and_then(|keyfile| {
                bounded_retry(
                    &drive.name,
                    enc.max_attempts,
                    |attempt| {
                        self.read_secret(
                            drive,
                            &state,
                            attempt,
                            &format!("Enter gpg passphrase for {}: ", keyfile.display()),
                        )
                    },
                    |passphrase, _| {
                        attempting();
                        unlocker.unlock(
                            &request,
                            Credential::GpgKeyfile {
                                keyfile,
                                passphrase: passphrase.as_bytes(),
                            },
                        )
                    },
                )
            }),
        };

        match result {
            Ok(()) => {
                transition(drive, &state, DriveState::Unlocked);
                info!("{} unlocked", drive.name);
                Ok(())
            }
            Err(err) => {
                transition(drive, &state, DriveState::Failed);
                Err(err)
            }
        }
    }

    fn read_secret(
        &self,
        drive: &ResolvedDrive,
        state: &Cell<DriveState>,
        attempt: u32,
        prompt: &str,
    ) -> BootResult<Zeroizing<String>> {
        if attempt > 1 {
            transition(drive, state, DriveState::AwaitingCredential);
        }
        self.services.prompt.read_secret(prompt)
    }

    fn release(&self, session: &KeySession) {
        let Some(mount_point) = &session.mounted else {
            return;
        };
        match self.services.platform.unmount(mount_point) {
            Ok(()) => debug!("unmounted key drive from {}", mount_point.display()),
            Err(err) => warn!(
                "failed to unmount key drive at {}: {err}",
                mount_point.display()
            ),
        }
    }
}

fn transition(drive: &ResolvedDrive, state: &Cell<DriveState>, next: DriveState) {
    let previous = state.replace(next);
    if previous != next {
        debug!("{}: {previous} -> {next}", drive.name);
    }
}
