//! ZFS provider integration.
//!
//! `system` implements `PoolProvider` using the host `zpool`/`zfs` CLIs and
//! `mount -t zfs`. `command` isolates the argument building so the exact
//! command lines stay testable.

mod command;
mod system;

pub use system::{SystemZfsProvider, ZfsTools};
