//! Mirrored (RAID-1) virtual block device module.
//!
//! A `raid1` [`mirror::Mirror`] fans reads across N base-device replicas
//! and writes to all of them, repairing a replica inline when a read
//! catches it out of sync and tracking which regions a faulty replica
//! missed so a later rebuild only has to copy those regions back
//! ([`dispatch`], [`channel`]). [`fragmap`] and [`rpc`] expose the
//! allocated-cluster bitmap a management tool needs to size a rebuild or a
//! snapshot before kicking it off.

pub mod bitarray;
pub mod channel;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod fragmap;
pub mod io;
pub mod iovec;
pub mod mirror;
pub mod rpc;
pub mod waitqueue;

#[cfg(test)]
mod testutil;

pub use device::{BaseBdev, FileBaseBdev, IoOpts, MemoryDomainHandle, SubmitOutcome};
pub use error::{Error, Result};
pub use io::{DispatchOutcome, MirrorIo, OpPayload};
pub use mirror::{BaseSlot, Mirror, MirrorChannel, MirrorConfig, RaidModule, MODULE_INFO};
