use bootchain_core::error::BootResult;
use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

pub(crate) const DEFAULT_MOUNT_TABLE: &str = "/proc/mounts";

/// Look up where `device` is mounted according to the table at `table`.
///
/// Symlinked device names (`/dev/disk/by-label/KEYS`) match the node the
/// kernel reports.
pub(crate) fn find_mount_point(table: &Path, device: &Path) -> BootResult<Option<PathBuf>> {
    let mounts = fs::read_to_string(table)?;
    Ok(parse_mounts(&mounts, device))
}

fn parse_mounts(mounts: &str, device: &Path) -> Option<PathBuf> {
    let wanted = canonical(device);
    for line in mounts.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(source), Some(mountpoint)) = (parts.next(), parts.next()) else {
            continue;
        };
        let source = unescape_mount_field(source);
        if source == device || canonical(&source) == wanted {
            return Some(unescape_mount_field(mountpoint));
        }
    }
    None
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Decode the `\ooo` octal escapes the kernel uses for whitespace and
/// other special bytes. Decoding happens on bytes so multi-byte names such
/// as `\303\251` come back intact.
fn unescape_mount_field(input: &str) -> PathBuf {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(value) = bytes.get(i + 1..i + 4).and_then(octal_byte) {
                output.push(value);
                i += 4;
                continue;
            }
        }
        output.push(bytes[i]);
        i += 1;
    }
    PathBuf::from(OsString::from_vec(output))
}

fn octal_byte(digits: &[u8]) -> Option<u8> {
    digits.iter().try_fold(0u8, |acc, digit| match digit {
        b'0'..=b'7' => acc.checked_mul(8)?.checked_add(digit - b'0'),
        _ => None,
    })
}
