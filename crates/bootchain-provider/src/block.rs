//! Contracts for software RAID assembly and LVM activation.
//!
//! Both are fire-and-forget from the engine's point of view: there is no
//! structured result beyond success or failure.

use std::error::Error;

/// Array-assembly service (md RAID).
pub trait ArrayProvider {
    type Error: Error + Send + Sync + 'static;

    /// Rescan member devices and persist the discovered array layout.
    fn scan_and_persist(&self) -> Result<(), Self::Error>;

    /// Assemble every array described by the persisted layout.
    fn assemble(&self) -> Result<(), Self::Error>;
}

/// Volume-activation service (LVM).
pub trait VolumeProvider {
    type Error: Error + Send + Sync + 'static;

    /// Activate all volume groups.
    fn activate_all(&self) -> Result<(), Self::Error>;

    /// Make sure device nodes exist for every active logical volume.
    fn make_nodes(&self) -> Result<(), Self::Error>;
}
