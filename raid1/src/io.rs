//! The `mirror_io` request object (spec §3, §9 "Polymorphism over op
//! type"): a tagged variant carrying op-specific payload over a common
//! header, rather than the source's switch-on-op-kind.

use crate::device::IoOpts;
use crate::iovec::IoVec;

/// Op-specific payload. R/W carry the shared iovec; UNMAP/FLUSH need only
/// the header's (offset_blocks, num_blocks).
pub enum OpPayload {
    Read(IoVec),
    Write(IoVec),
    Unmap,
    Flush,
}

/// Which leg of read-repair (spec §4.5) a parked read is resuming into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RepairPhase {
    #[default]
    None,
    Probing,
    WriteBack,
}

/// The in-flight context for one logical operation presented to the
/// mirror (spec §3 "mirror_io", §9 "Cyclic ownership").
///
/// `submitted` is the fan-out cursor for write/unmap/flush (spec §4.4) and
/// doubles, for reads, as a 0/1 "have we picked a replica yet" flag.
/// `repair_cursor`/`repair_failed_base` are read-repair's private
/// continuation state (spec §4.5), unused outside that path.
pub struct MirrorIo {
    pub op: OpPayload,
    pub offset_blocks: u64,
    pub num_blocks: u64,
    pub opts: IoOpts,
    pub submitted: usize,
    pub remaining: usize,
    pub submitted_base: Option<usize>,
    /// Best-seen leg status for the write/unmap/flush aggregator (spec
    /// §4.4): starts FAILED, promoted to SUCCESS by the first good leg.
    pub status: bool,
    pub repair_cursor: usize,
    pub repair_failed_base: Option<usize>,
    pub repair_phase: RepairPhase,
    /// Set only for rebuild/copy reads issued by `dispatch::process`: the
    /// base the read's data is destined to be written back to.
    pub process_target: Option<usize>,
}

impl MirrorIo {
    pub fn new_read(offset_blocks: u64, num_blocks: u64, iov: IoVec, opts: IoOpts) -> Self {
        MirrorIo {
            op: OpPayload::Read(iov),
            offset_blocks,
            num_blocks,
            opts,
            submitted: 0,
            remaining: 0,
            submitted_base: None,
            status: false,
            repair_cursor: 0,
            repair_failed_base: None,
            repair_phase: RepairPhase::None,
            process_target: None,
        }
    }

    pub fn new_write(offset_blocks: u64, num_blocks: u64, iov: IoVec, opts: IoOpts) -> Self {
        MirrorIo {
            op: OpPayload::Write(iov),
            offset_blocks,
            num_blocks,
            opts,
            submitted: 0,
            remaining: 0,
            submitted_base: None,
            status: false,
            repair_cursor: 0,
            repair_failed_base: None,
            repair_phase: RepairPhase::None,
            process_target: None,
        }
    }

    pub fn new_unmap(offset_blocks: u64, num_blocks: u64, opts: IoOpts) -> Self {
        MirrorIo {
            op: OpPayload::Unmap,
            offset_blocks,
            num_blocks,
            opts,
            submitted: 0,
            remaining: 0,
            submitted_base: None,
            status: false,
            repair_cursor: 0,
            repair_failed_base: None,
            repair_phase: RepairPhase::None,
            process_target: None,
        }
    }

    pub fn new_flush(offset_blocks: u64, num_blocks: u64, opts: IoOpts) -> Self {
        MirrorIo {
            op: OpPayload::Flush,
            offset_blocks,
            num_blocks,
            opts,
            submitted: 0,
            remaining: 0,
            submitted_base: None,
            status: false,
            repair_cursor: 0,
            repair_failed_base: None,
            repair_phase: RepairPhase::None,
            process_target: None,
        }
    }

    /// The delta-bitmap region range this IO's block range touches (spec
    /// §4.5): `[offset_blocks / boundary, (offset_blocks + num_blocks - 1) / boundary]`.
    pub fn region_range(&self, optimal_boundary: u64) -> (u64, u64) {
        let start = self.offset_blocks / optimal_boundary;
        let end = (self.offset_blocks + self.num_blocks - 1) / optimal_boundary;
        (start, end)
    }
}

/// Outcome of a dispatch call: either the `mirror_io` reached a terminal
/// state (the bool is the spec's SUCCESS/FAILED) or it parked awaiting
/// back-pressure relief.
pub enum DispatchOutcome {
    Done(bool),
    Parked,
}

/// Like [`DispatchOutcome`] but hands the `mirror_io` back on completion —
/// used internally by the read path so the background-process pipeline
/// (`dispatch::process`) can read the populated iovec straight out of a
/// successful read without a second copy.
pub enum ReadOutcome {
    Done(bool, MirrorIo),
    Parked,
}

impl ReadOutcome {
    pub fn into_dispatch(self) -> DispatchOutcome {
        match self {
            ReadOutcome::Done(status, _) => DispatchOutcome::Done(status),
            ReadOutcome::Parked => DispatchOutcome::Parked,
        }
    }
}
