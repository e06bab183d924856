//! Write / unmap / flush dispatcher (spec §4.4): identical fan-out and
//! completion-aggregation structure for all three ops.

use tracing::{error, warn};

use crate::device::SubmitOutcome;
use crate::io::{DispatchOutcome, MirrorIo, OpPayload};
use crate::mirror::{self, Mirror, MirrorChannel};

/// Submits (or resumes, from `io.submitted`) a write/unmap/flush leg
/// fan-out. The aggregator's default terminal status is FAILED; any leg
/// that completes SUCCESS promotes it (spec §4.4, §9 "all-skip write
/// returns FAILED" resolved as intentional in DESIGN.md).
pub fn submit_write(mirror: &Mirror, channel: &mut MirrorChannel, mut io: MirrorIo) -> DispatchOutcome {
    let n = mirror.bases.len();
    if io.submitted == 0 {
        io.remaining = n;
    }

    while io.submitted < n {
        let i = io.submitted;

        if !channel.state.attached[i] {
            match io.op {
                OpPayload::Write(_) => {
                    let (start, end) = io.region_range(mirror.optimal_io_boundary.max(1) as u64);
                    channel.state.handle_faulty_base(i, start, end);
                }
                OpPayload::Unmap | OpPayload::Flush => {
                    io.status = true;
                }
                OpPayload::Read(_) => unreachable!("write dispatcher only handles WRITE/UNMAP/FLUSH"),
            }
            io.submitted += 1;
            io.remaining -= 1;
            continue;
        }

        let device = match &mirror.bases[i].device {
            Some(d) => d.as_ref(),
            None => {
                // attached[i] should mirror device presence (see mirror.rs's
                // get_io_channel/channel_grow_base_bdev); if it doesn't,
                // treat the leg like a failed completion rather than a
                // silent success, same as the `Completed(false)` case below.
                if matches!(io.op, OpPayload::Write(_)) {
                    let (start, end) = io.region_range(mirror.optimal_io_boundary.max(1) as u64);
                    channel.state.handle_faulty_base(i, start, end);
                    mirror::fail_base_bdev(channel, i);
                }
                io.submitted += 1;
                io.remaining -= 1;
                continue;
            }
        };

        let outcome = match &io.op {
            OpPayload::Write(iov) => device.writev_blocks_ext(io.offset_blocks, io.num_blocks, iov, &io.opts),
            OpPayload::Unmap => device.unmap_blocks(io.offset_blocks, io.num_blocks),
            OpPayload::Flush => device.flush_blocks(io.offset_blocks, io.num_blocks),
            OpPayload::Read(_) => unreachable!(),
        };

        match outcome {
            SubmitOutcome::Full => {
                channel.wait.park(i, io);
                return DispatchOutcome::Parked;
            }
            SubmitOutcome::Err(e) => {
                error!(mirror = %mirror.name, base = i, error = %e, "leg submission rejected, failing remaining legs");
                io.submitted = n;
                io.remaining = 0;
                break;
            }
            SubmitOutcome::Completed(true) => {
                io.status = true;
                io.submitted += 1;
                io.remaining -= 1;
            }
            SubmitOutcome::Completed(false) => {
                if matches!(io.op, OpPayload::Write(_)) {
                    warn!(mirror = %mirror.name, base = i, "write leg failed, marking base faulty");
                    let (start, end) = io.region_range(mirror.optimal_io_boundary.max(1) as u64);
                    channel.state.handle_faulty_base(i, start, end);
                    mirror::fail_base_bdev(channel, i);
                }
                io.submitted += 1;
                io.remaining -= 1;
            }
        }
    }

    DispatchOutcome::Done(io.status)
}

pub fn resume(mirror: &Mirror, channel: &mut MirrorChannel, io: MirrorIo) -> DispatchOutcome {
    submit_write(mirror, channel, io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use crate::device::{BaseBdev, IoOpts};
    use crate::io::MirrorIo;
    use crate::iovec::IoVec;
    use crate::mirror::{BaseSlot, MirrorConfig, RaidModule};
    use crate::testutil::{Fault, FakeBaseDevice};
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
    fn write_with_one_missing_replica_still_succeeds() {
        let (mirror, _fakes, mut channel) = setup(3);
        channel.state.attached[1] = false;
        let io = MirrorIo::new_write(0, 4, IoVec::with_zeroed(4 * 512), IoOpts::default());
        assert!(matches!(submit_write(&mirror, &mut channel, io), DispatchOutcome::Done(true)));
        assert_eq!(channel.state.base_state[1], crate::channel::BaseDevState::Faulty);
        assert!(channel.state.delta_bitmaps[1].as_ref().unwrap().get(0));
    }

    #[test]
    fn enomem_back_pressure_parks_and_resumes_from_cursor() {
        let (mirror, fakes, mut channel) = setup(2);
        fakes[0].push_write_fault(Fault::Full);
        let io = MirrorIo::new_write(0, 4, IoVec::with_zeroed(4 * 512), IoOpts::default());
        assert!(matches!(submit_write(&mirror, &mut channel, io), DispatchOutcome::Parked));
        let parked = channel.wait.drain(0);
        assert_eq!(parked.len(), 1);
        let io = parked.into_iter().next().unwrap();
        assert_eq!(io.submitted, 0);
        let result = resume(&mirror, &mut channel, io);
        assert!(matches!(result, DispatchOutcome::Done(true)));
    }

    #[test]
    fn all_missing_replicas_write_returns_failed() {
        let (mirror, _fakes, mut channel) = setup(2);
        channel.state.attached[0] = false;
        channel.state.attached[1] = false;
        let io = MirrorIo::new_write(0, 4, IoVec::with_zeroed(4 * 512), IoOpts::default());
        assert!(matches!(submit_write(&mirror, &mut channel, io), DispatchOutcome::Done(false)));
    }

    #[test]
    fn genuine_missing_slot_marks_faulty_via_get_io_channel() {
        let fake = Arc::new(FakeBaseDevice::new(64, 512, 8));
        let bases = vec![
            BaseSlot::missing(),
            BaseSlot::present(fake.clone() as Arc<dyn BaseBdev>, 0),
        ];
        let mut mirror = Mirror::new("test", bases, MirrorConfig { delta_tracking_enabled: true });
        mirror.start().unwrap();
        let mut channel = mirror.get_io_channel();
        assert!(!channel.state.attached[0], "a missing slot must come up unattached");

        let io = MirrorIo::new_write(0, 4, IoVec::with_zeroed(4 * 512), IoOpts::default());
        assert!(matches!(submit_write(&mirror, &mut channel, io), DispatchOutcome::Done(true)));
        assert_eq!(channel.state.base_state[0], crate::channel::BaseDevState::Faulty);
        assert!(channel.state.delta_bitmaps[0].as_ref().unwrap().get(0));
    }

    #[test]
    fn unmap_with_missing_replica_counts_as_success_leg() {
        let (mirror, _fakes, mut channel) = setup(2);
        channel.state.attached[0] = false;
        let io = MirrorIo::new_unmap(0, 4, IoOpts::default());
        assert!(matches!(submit_write(&mirror, &mut channel, io), DispatchOutcome::Done(true)));
    }
}
