//! Background-process pipeline (spec §2 item 8, §3 "Process request"):
//! rebuild/copy reads a region from a healthy replica and writes it to the
//! target (rebuilding) replica, reusing the read dispatcher and honoring
//! back-pressure the same way foreground I/O does.

use tracing::{debug, warn};

use crate::device::{IoOpts, SubmitOutcome};
use crate::io::{DispatchOutcome, MirrorIo, OpPayload, ReadOutcome};
use crate::iovec::IoVec;
use crate::mirror::{Mirror, MirrorChannel};

use super::read;

/// One rebuild step: copy `[offset_blocks, offset_blocks + num_blocks)`
/// from whichever replica the read dispatcher picks onto `target_base`.
pub struct ProcessRequest {
    pub target_base: usize,
    pub offset_blocks: u64,
    pub num_blocks: u64,
    pub metadata: Option<Vec<u8>>,
}

/// Drives one rebuild step to completion (or a park). The read leg is the
/// ordinary read dispatcher, load-balanced across every healthy replica
/// *except* `target_base` (rebuild never reads from the device it is
/// about to overwrite); the write leg targets `target_base` directly,
/// independent of the write/unmap/flush fan-out aggregator since a
/// rebuild write has exactly one destination.
pub fn submit_process_request(mirror: &Mirror, channel: &mut MirrorChannel, req: ProcessRequest) -> DispatchOutcome {
    let block_size = mirror.block_size.max(1);
    let opts = IoOpts {
        memory_domain: None,
        metadata: req.metadata,
    };
    let mut io = MirrorIo::new_read(
        req.offset_blocks,
        req.num_blocks,
        IoVec::with_zeroed((req.num_blocks * block_size) as usize),
        opts,
    );
    io.process_target = Some(req.target_base);
    run_read_leg(mirror, channel, io)
}

pub fn resume(mirror: &Mirror, channel: &mut MirrorChannel, io: MirrorIo) -> DispatchOutcome {
    debug_assert!(io.process_target.is_some(), "process::resume only takes rebuild reads");
    run_read_leg(mirror, channel, io)
}

fn run_read_leg(mirror: &Mirror, channel: &mut MirrorChannel, io: MirrorIo) -> DispatchOutcome {
    let target = io.process_target.expect("run_read_leg requires a process target");
    let was_attached = channel.state.attached[target];
    channel.state.attached[target] = false;
    let outcome = if io.submitted_base.is_some() || io.repair_failed_base.is_some() {
        read::resume_keep(mirror, channel, io)
    } else {
        read::submit_read_keep(mirror, channel, io)
    };
    channel.state.attached[target] = was_attached;

    match outcome {
        ReadOutcome::Parked => DispatchOutcome::Parked,
        ReadOutcome::Done(false, _) => {
            warn!(mirror = %mirror.name, target, "rebuild read failed, step skipped");
            DispatchOutcome::Done(false)
        }
        ReadOutcome::Done(true, io) => write_step(mirror, channel, target, io),
    }
}

fn write_step(mirror: &Mirror, channel: &mut MirrorChannel, target: usize, io: MirrorIo) -> DispatchOutcome {
    let device = match &mirror.bases[target].device {
        Some(d) => d.as_ref(),
        None => return DispatchOutcome::Done(false),
    };
    let iov = match &io.op {
        OpPayload::Read(v) => v,
        _ => unreachable!("process requests are always READ-shaped"),
    };
    match device.writev_blocks_ext(io.offset_blocks, io.num_blocks, iov, &io.opts) {
        SubmitOutcome::Full => {
            // The read already completed; re-running the read on resume
            // would be redundant work but is otherwise harmless, so rather
            // than introduce a third resume phase we simply retry the
            // whole step (read target excluded, so it is idempotent).
            channel.wait.park(target, io);
            DispatchOutcome::Parked
        }
        SubmitOutcome::Err(_) | SubmitOutcome::Completed(false) => {
            warn!(mirror = %mirror.name, target, "rebuild write failed");
            DispatchOutcome::Done(false)
        }
        SubmitOutcome::Completed(true) => {
            debug!(mirror = %mirror.name, target, offset_blocks = io.offset_blocks, num_blocks = io.num_blocks, "rebuild step complete");
            DispatchOutcome::Done(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use crate::device::BaseBdev;
    use crate::mirror::{BaseSlot, MirrorConfig, RaidModule};
    use crate::testutil::FakeBaseDevice;
    use crate::waitqueue::WaitQueue;
    use std::sync::Arc;

    fn setup(n: usize) -> (Mirror, Vec<Arc<FakeBaseDevice>>, MirrorChannel) {
        let fakes: Vec<_> = (0..n).map(|_| Arc::new(FakeBaseDevice::new(64, 512, 8))).collect();
        let bases = fakes
            .iter()
            .map(|f| BaseSlot::present(f.clone() as Arc<dyn BaseBdev>, 0))
            .collect();
        let mut mirror = Mirror::new("test", bases, MirrorConfig { delta_tracking_enabled: true });
        mirror.start().unwrap();
        let channel = MirrorChannel {
            state: ChannelState::create(n, mirror.delta_tracking_enabled, mirror.num_regions()).unwrap(),
            wait: WaitQueue::new(n),
        };
        (mirror, fakes, channel)
    }

    #[test]
    fn rebuild_step_copies_from_healthy_replica_to_target() {
        let (mirror, fakes, mut channel) = setup(2);
        let bytes = vec![42u8; 8 * 512];
        fakes[0].seed(0, &bytes);

        let req = ProcessRequest {
            target_base: 1,
            offset_blocks: 0,
            num_blocks: 8,
            metadata: None,
        };
        let outcome = submit_process_request(&mirror, &mut channel, req);
        assert!(matches!(outcome, DispatchOutcome::Done(true)));
        assert_eq!(&fakes[1].contents()[0..bytes.len()], &bytes[..]);
    }

    #[test]
    fn rebuild_never_reads_from_its_own_target() {
        let (mirror, fakes, mut channel) = setup(2);
        let bytes = vec![1u8; 8 * 512];
        fakes[0].seed(0, &bytes);
        fakes[1].seed(0, &vec![0xffu8; 8 * 512]);

        let req = ProcessRequest {
            target_base: 1,
            offset_blocks: 0,
            num_blocks: 8,
            metadata: None,
        };
        submit_process_request(&mirror, &mut channel, req);
        assert_eq!(&fakes[1].contents()[0..bytes.len()], &bytes[..]);
    }
}
