//! Read dispatcher (spec §4.3).

use tracing::{debug, warn};

use crate::device::SubmitOutcome;
use crate::io::{DispatchOutcome, MirrorIo, OpPayload, ReadOutcome, RepairPhase};
use crate::mirror::{Mirror, MirrorChannel};

use super::repair;

/// `next_read_base` (spec §4.3): delegates to the channel, which owns the
/// outstanding-counter array and the tie-break rotation (spec §9 open
/// question on tie-breaking, resolved in DESIGN.md).
pub fn next_read_base(channel: &mut MirrorChannel) -> Option<usize> {
    channel.state.next_read_base()
}

/// Submits (or resumes, from `io.submitted_base`) a read, handing the
/// `mirror_io` back on completion (see [`ReadOutcome`]).
pub fn submit_read_keep(mirror: &Mirror, channel: &mut MirrorChannel, mut io: MirrorIo) -> ReadOutcome {
    let base_idx = match io.submitted_base {
        Some(i) => i,
        None => loop {
            let candidate = match next_read_base(channel) {
                Some(i) => i,
                None => {
                    warn!(mirror = %mirror.name, "read failed: no healthy replica");
                    return ReadOutcome::Done(false, io);
                }
            };
            if mirror.bases[candidate].device.is_some() {
                break candidate;
            }
            // attached[i] should mirror device presence (see mirror.rs's
            // get_io_channel/channel_grow_base_bdev); if it doesn't, don't
            // fail the whole read over one bad candidate, try the next one
            // the same way read-repair's probe loop does.
            channel.state.attached[candidate] = false;
        },
    };
    io.submitted_base = Some(base_idx);

    let device = match &mirror.bases[base_idx].device {
        Some(d) => d.as_ref(),
        None => return ReadOutcome::Done(false, io),
    };

    let iov = match &mut io.op {
        OpPayload::Read(v) => v,
        _ => unreachable!("submit_read only handles READ"),
    };

    channel.state.outstanding_read_blocks[base_idx] += io.num_blocks;
    let outcome = device.readv_blocks_ext(io.offset_blocks, io.num_blocks, iov, &io.opts);

    match outcome {
        SubmitOutcome::Full => {
            channel.state.outstanding_read_blocks[base_idx] -= io.num_blocks;
            channel.wait.park(base_idx, io);
            ReadOutcome::Parked
        }
        SubmitOutcome::Err(e) => {
            channel.state.outstanding_read_blocks[base_idx] -= io.num_blocks;
            warn!(mirror = %mirror.name, base = base_idx, error = %e, "read submission rejected");
            ReadOutcome::Done(false, io)
        }
        SubmitOutcome::Completed(true) => {
            channel.state.outstanding_read_blocks[base_idx] -= io.num_blocks;
            debug!(mirror = %mirror.name, base = base_idx, "read completed");
            ReadOutcome::Done(true, io)
        }
        SubmitOutcome::Completed(false) => {
            channel.state.outstanding_read_blocks[base_idx] -= io.num_blocks;
            warn!(mirror = %mirror.name, base = base_idx, "read failed, entering read repair");
            repair::begin(mirror, channel, io, base_idx)
        }
    }
}

pub fn submit_read(mirror: &Mirror, channel: &mut MirrorChannel, io: MirrorIo) -> DispatchOutcome {
    submit_read_keep(mirror, channel, io).into_dispatch()
}

/// Re-enters dispatch for a `mirror_io` drained off a wait queue, handing
/// it back on completion.
pub fn resume_keep(mirror: &Mirror, channel: &mut MirrorChannel, io: MirrorIo) -> ReadOutcome {
    match io.repair_phase {
        RepairPhase::None => submit_read_keep(mirror, channel, io),
        RepairPhase::Probing => repair::resume_probe(mirror, channel, io),
        RepairPhase::WriteBack => repair::resume_write_back(mirror, channel, io),
    }
}

pub fn resume(mirror: &Mirror, channel: &mut MirrorChannel, io: MirrorIo) -> DispatchOutcome {
    resume_keep(mirror, channel, io).into_dispatch()
}
