//! Execution wrapper for invoking `cryptsetup` and `gpg`.
//!
//! The goal is to keep shell integration isolated so provider logic stays
//! testable (fake binaries, deterministic stderr classification).

use bootchain_core::command::{non_empty_diagnostic, CommandOutput, ExternalCommand};
use bootchain_core::error::{BootError, BootResult};
use bootchain_provider::Subsystem;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

pub(crate) const DEFAULT_MAPPER_DIR: &str = "/dev/mapper";

/// cryptsetup exits with 2 when no keyslot accepted the key material.
const EXIT_WRONG_KEY: i32 = 2;

#[derive(Debug, Clone)]
pub(crate) struct CryptsetupCommand {
    command: ExternalCommand,
    mapper_dir: PathBuf,
}

/// Key material for one `open` call.
pub(crate) enum KeySource<'a> {
    /// Path handed to `--key-file`.
    File(&'a Path),
    /// Bytes piped on stdin with `--key-file -`.
    Stdin(&'a [u8]),
}

impl CryptsetupCommand {
    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self {
            command: ExternalCommand::new(binary, Subsystem::Luks, timeout),
            mapper_dir: PathBuf::from(DEFAULT_MAPPER_DIR),
        }
    }

    pub(crate) fn with_mapper_dir(mut self, dir: PathBuf) -> Self {
        self.mapper_dir = dir;
        self
    }

    pub(crate) fn mapping_active(&self, name: &str) -> BootResult<bool> {
        if self.mapper_node_exists(name) {
            return Ok(true);
        }
        let out = self.command.run(&["status", name], None)?;
        Ok(out.success())
    }

    pub(crate) fn open(
        &self,
        source: &Path,
        name: &str,
        key: KeySource<'_>,
        options: &[String],
        key_desc: &str,
    ) -> BootResult<()> {
        let source_arg = source.to_string_lossy().into_owned();
        let (key_arg, input) = match key {
            KeySource::File(path) => (path.to_string_lossy().into_owned(), None),
            KeySource::Stdin(bytes) => ("-".to_string(), Some(bytes)),
        };

        let mut primary: Vec<&str> = vec!["open", "--type", "luks", "--batch-mode", "--key-file"];
        primary.push(&key_arg);
        primary.extend(options.iter().map(String::as_str));
        primary.push(&source_arg);
        primary.push(name);
        let mut out = self.command.run(&primary, input)?;

        if !out.success() && action_unsupported(&out) {
            let mut fallback: Vec<&str> = vec!["luksOpen", "--batch-mode", "--key-file"];
            fallback.push(&key_arg);
            fallback.extend(options.iter().map(String::as_str));
            fallback.push(&source_arg);
            fallback.push(name);
            out = self.command.run(&fallback, input)?;
        }

        if out.success() {
            return Ok(());
        }
        Err(classify_open_failure(name, source, key_desc, &out))
    }

    fn mapper_node_exists(&self, name: &str) -> bool {
        self.mapper_dir.is_dir() && self.mapper_dir.join(name).exists()
    }
}

/// Decrypts gpg-encrypted keyfiles into memory.
#[derive(Debug, Clone)]
pub(crate) struct GpgCommand {
    command: ExternalCommand,
}

impl GpgCommand {
    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self {
            command: ExternalCommand::new(binary, Subsystem::Gpg, timeout),
        }
    }

    /// Decrypt `keyfile` with `passphrase` (read by gpg from stdin) and
    /// return the plaintext key.
    pub(crate) fn decrypt(
        &self,
        keyfile: &Path,
        passphrase: &[u8],
        target: &str,
    ) -> BootResult<Zeroizing<Vec<u8>>> {
        let mut input = Zeroizing::new(Vec::with_capacity(passphrase.len() + 1));
        input.extend_from_slice(passphrase);
        input.push(b'\n');

        let keyfile_arg = keyfile.to_string_lossy().into_owned();
        let args = [
            "--batch",
            "--quiet",
            "--no-tty",
            "--pinentry-mode",
            "loopback",
            "--passphrase-fd",
            "0",
            "--decrypt",
            keyfile_arg.as_str(),
        ];
        let out = self.command.run(&args, Some(&input[..]))?;
        if out.success() && !out.stdout.is_empty() {
            return Ok(out.stdout);
        }
        Err(classify_gpg_failure(target, keyfile, &out))
    }
}

fn action_unsupported(output: &CommandOutput) -> bool {
    let lower = output.diagnostic().to_ascii_lowercase();
    lower.contains("unknown action")
        || lower.contains("unknown command")
        || lower.contains("invalid action")
        || lower.contains("invalid command")
        || lower.contains("unknown option")
}

fn classify_open_failure(
    name: &str,
    source: &Path,
    key_desc: &str,
    output: &CommandOutput,
) -> BootError {
    let diagnostic = non_empty_diagnostic(output);
    let lower = diagnostic.to_ascii_lowercase();

    if output.status == EXIT_WRONG_KEY
        || lower.contains("no key available")
        || lower.contains("wrong key")
        || lower.contains("passphrase is incorrect")
        || lower.contains("invalid passphrase")
    {
        return BootError::Credential {
            target: name.to_string(),
            reason: format!(
                "cryptsetup rejected the {key_desc} for `{}`: {diagnostic}",
                source.display()
            ),
        };
    }

    if lower.contains("no such file")
        || lower.contains("does not exist")
        || lower.contains("not found")
        || lower.contains("cannot open device")
    {
        return BootError::device_not_found("encrypted device", source);
    }

    let source = source.display();
    let message = if lower.contains("not a valid luks device")
        || lower.contains("is not a luks device")
    {
        format!("`{source}` is not a LUKS device: {diagnostic}")
    } else if lower.contains("already exists") {
        format!("mapping `{name}` already exists: {diagnostic}")
    } else {
        format!("cryptsetup failed to open `{source}` as `{name}` using {key_desc}: {diagnostic}")
    };
    BootError::subsystem(
        Subsystem::Luks,
        format!("{message} (exit code {})", output.status),
    )
}

fn classify_gpg_failure(target: &str, keyfile: &Path, output: &CommandOutput) -> BootError {
    let diagnostic = non_empty_diagnostic(output);
    let lower = diagnostic.to_ascii_lowercase();

    if lower.contains("bad passphrase")
        || lower.contains("bad session key")
        || lower.contains("decryption failed")
    {
        return BootError::Credential {
            target: target.to_string(),
            reason: format!("gpg could not decrypt {}: {diagnostic}", keyfile.display()),
        };
    }

    if output.success() {
        return BootError::subsystem(
            Subsystem::Gpg,
            format!("gpg produced no key material from {}", keyfile.display()),
        );
    }

    BootError::subsystem(
        Subsystem::Gpg,
        format!(
            "gpg failed to decrypt {}: {diagnostic} (exit code {})",
            keyfile.display(),
            output.status
        ),
    )
}
