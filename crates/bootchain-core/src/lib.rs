//! Core building blocks of the bootchain initramfs.
//!
//! Parameter parsing, the trigger pipeline, the unlock and import engines,
//! and the boot sequence live here. Everything that touches the system goes
//! through the provider traits so the engine runs unchanged against mocks.

pub mod command;
pub mod config;
pub mod decrypt;
pub mod error;
pub mod logging;
pub mod params;
pub mod pool;
pub mod provider;
pub mod resolver;
pub mod retry;
pub mod root;
pub mod sequence;
pub mod triggers;

pub use config::{Features, InitConfig, Paths, Tools};
pub use decrypt::{DecryptionEngine, DriveState, ResolvedDrive};
pub use error::{BootError, BootResult};
pub use params::{BootConfig, EncryptionConfig, EncryptionKind};
pub use pool::{ImportRoute, PoolImportState, PoolImporter};
pub use provider::Services;
pub use resolver::{resolve_device, DeviceResolver};
pub use root::RootMounter;
pub use sequence::{BootOutcome, BootSequencer};
pub use triggers::{TriggerKind, TriggerPipeline};
