#![forbid(unsafe_code)]

//! System provider for LUKS-backed mappings.
//!
//! Integrates with the host via:
//! - `cryptsetup` (open/status, with a `luksOpen` fallback for old builds)
//! - `gpg` for keyfiles that are themselves encrypted

mod command;
mod system;

pub use system::SystemLuksProvider;
