//! Execution wrapper for the external tools bootchain drives.
//!
//! Every subsystem (cryptsetup, gpg, zpool, mdadm, lvm, ...) goes through
//! `ExternalCommand` so stdin feeding, output capture, and timeouts behave the
//! same everywhere and tests can swap in fake binaries.

use crate::error::{BootError, BootResult};
use bootchain_provider::Subsystem;
use std::env;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// Directories searched for tools before falling back to `PATH`.
pub const SYSTEM_BIN_DIRS: &[&str] = &[
    "/sbin",
    "/bin",
    "/usr/sbin",
    "/usr/bin",
    "/usr/local/sbin",
    "/usr/local/bin",
];

#[derive(Debug, Clone)]
pub struct ExternalCommand {
    binary: PathBuf,
    subsystem: Subsystem,
    timeout: Duration,
}

/// Captured result of one invocation.
///
/// stdout is kept as raw bytes because some tools (gpg) emit key material.
pub struct CommandOutput {
    pub stdout: Zeroizing<Vec<u8>>,
    pub stderr: String,
    pub status: i32,
}

impl std::fmt::Debug for CommandOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandOutput")
            .field("stdout_len", &self.stdout.len())
            .field("stderr", &self.stderr)
            .field("status", &self.status)
            .finish()
    }
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stderr when present, stdout otherwise, trimmed.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

impl ExternalCommand {
    pub fn new(binary: PathBuf, subsystem: Subsystem, timeout: Duration) -> Self {
        Self {
            binary,
            subsystem,
            timeout,
        }
    }

    /// Run with `args`, optionally writing `input` to stdin, and capture output.
    pub fn run(&self, args: &[&str], input: Option<&[u8]>) -> BootResult<CommandOutput> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn().map_err(|err| {
            BootError::subsystem(
                self.subsystem,
                format!("failed to spawn {}: {err}", self.binary.display()),
            )
        })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_handle = spawn_output_reader(stdout_pipe);
        let stderr_handle = spawn_output_reader(stderr_pipe);

        if let Some(payload) = input {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that exits before reading stdin closes the pipe; its
                // exit status carries the real error.
                let _ = stdin.write_all(payload);
                let _ = stdin.flush();
            }
        }

        let status = self.wait_with_timeout(&mut child)?;

        let stdout = stdout_handle
            .join()
            .map_err(|_| self.failure("stdout reader thread panicked"))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| self.failure("stderr reader thread panicked"))??;

        Ok(CommandOutput {
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            status,
        })
    }

    /// Run and turn a non-zero exit into a `Subsystem` error.
    pub fn run_checked(&self, args: &[&str], input: Option<&[u8]>) -> BootResult<CommandOutput> {
        let out = self.run(args, input)?;
        if out.success() {
            return Ok(out);
        }
        Err(self.failure(format!(
            "`{} {}` exited with code {}: {}",
            self.binary.display(),
            args.join(" "),
            out.status,
            non_empty_diagnostic(&out)
        )))
    }

    fn wait_with_timeout(&self, child: &mut Child) -> BootResult<i32> {
        let start = Instant::now();
        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                return Ok(status.code().unwrap_or(-1));
            }
            thread::sleep(Duration::from_millis(25));
        }

        let _ = child.kill();
        let _ = child.wait();
        Err(self.failure(format!(
            "{} timed out after {:?}",
            self.binary.display(),
            self.timeout
        )))
    }

    fn failure(&self, message: impl Into<String>) -> BootError {
        BootError::subsystem(self.subsystem, message)
    }
}

/// Diagnostic text, or a placeholder when the tool printed nothing.
pub fn non_empty_diagnostic(output: &CommandOutput) -> String {
    let diagnostic = output.diagnostic();
    if diagnostic.is_empty() {
        "no additional output".to_string()
    } else {
        diagnostic
    }
}

/// Locate `name`, preferring an explicitly configured path.
pub fn resolve_binary(configured: Option<&str>, name: &str) -> BootResult<PathBuf> {
    if let Some(path) = configured.map(str::trim).filter(|path| !path.is_empty()) {
        let candidate = Path::new(path);
        if !candidate.exists() {
            return Err(BootError::InvalidConfig(format!(
                "{name} binary not found at {}",
                candidate.display()
            )));
        }
        return Ok(candidate.to_path_buf());
    }

    SYSTEM_BIN_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| candidate.exists())
        .or_else(|| find_in_path(name))
        .ok_or_else(|| {
            BootError::InvalidConfig(format!(
                "unable to locate {name}; tried {SYSTEM_BIN_DIRS:?} and PATH"
            ))
        })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.exists() {
            Some(candidate)
        } else {
            None
        }
    })
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<BootResult<Zeroizing<Vec<u8>>>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> BootResult<Zeroizing<Vec<u8>>> {
        let mut buf = Zeroizing::new(Vec::new());
        if let Some(mut reader) = pipe {
            reader.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn captures_stdout_stderr_and_status() {
        let dir = tempdir().unwrap();
        let bin = script(dir.path(), "tool", "echo out; echo err 1>&2; exit 3");
        let cmd = ExternalCommand::new(bin, Subsystem::Raid, Duration::from_secs(5));

        let out = cmd.run(&[], None).unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(&out.stdout[..], b"out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.diagnostic(), "err");
    }

    #[test]
    fn feeds_stdin_payload() {
        let dir = tempdir().unwrap();
        let bin = script(dir.path(), "echo-stdin", "cat");
        let cmd = ExternalCommand::new(bin, Subsystem::Luks, Duration::from_secs(5));

        let out = cmd.run(&[], Some(b"secret")).unwrap();
        assert!(out.success());
        assert_eq!(&out.stdout[..], b"secret");
    }

    #[test]
    fn run_checked_reports_subsystem_failure() {
        let dir = tempdir().unwrap();
        let bin = script(dir.path(), "lvm", "echo 'no volume groups' 1>&2; exit 5");
        let cmd = ExternalCommand::new(bin, Subsystem::Lvm, Duration::from_secs(5));

        match cmd.run_checked(&["vgchange", "-ay"], None) {
            Err(BootError::Subsystem { subsystem, message }) => {
                assert_eq!(subsystem, Subsystem::Lvm);
                assert!(message.contains("vgchange -ay"));
                assert!(message.contains("no volume groups"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn kills_child_after_timeout() {
        let dir = tempdir().unwrap();
        let bin = script(dir.path(), "slow", "sleep 5");
        let cmd = ExternalCommand::new(bin, Subsystem::Zfs, Duration::from_millis(100));

        let err = cmd.run(&[], None).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn configured_binary_must_exist() {
        let err = resolve_binary(Some("/nonexistent/zpool"), "zpool").unwrap_err();
        assert!(matches!(err, BootError::InvalidConfig(_)));
    }

    #[test]
    fn configured_binary_wins() {
        let dir = tempdir().unwrap();
        let bin = script(dir.path(), "mdadm", "exit 0");
        let resolved = resolve_binary(Some(bin.to_str().unwrap()), "mdadm").unwrap();
        assert_eq!(resolved, bin);
    }
}
