//! Read-repair engine (spec §4.5 "Read-repair engine").
//!
//! Triggered when a read completes FAILED. Probes the other replicas in
//! turn; the first one that succeeds supplies the application-visible
//! data immediately, and its bytes are written back to the originally
//! failing replica best-effort — only the write-back's *submission* is
//! gated by back-pressure, its outcome never flips the read back to
//! FAILED (spec §4.5 rationale).

use tracing::{error, warn};

use crate::device::SubmitOutcome;
use crate::io::{MirrorIo, OpPayload, ReadOutcome, RepairPhase};
use crate::mirror::{self, Mirror, MirrorChannel};

fn mark_faulty(mirror: &Mirror, channel: &mut MirrorChannel, io: &MirrorIo, base: usize) {
    let (start, end) = io.region_range(mirror.optimal_io_boundary.max(1) as u64);
    channel.state.handle_faulty_base(base, start, end);
    mirror::fail_base_bdev(channel, base);
}

/// Starts a repair episode after `failed_base`'s read came back FAILED.
pub fn begin(mirror: &Mirror, channel: &mut MirrorChannel, mut io: MirrorIo, failed_base: usize) -> ReadOutcome {
    io.repair_failed_base = Some(failed_base);
    io.repair_cursor = 0;
    probe_from(mirror, channel, io)
}

pub fn resume_probe(mirror: &Mirror, channel: &mut MirrorChannel, io: MirrorIo) -> ReadOutcome {
    probe_from(mirror, channel, io)
}

fn probe_from(mirror: &Mirror, channel: &mut MirrorChannel, mut io: MirrorIo) -> ReadOutcome {
    let failed_base = io.repair_failed_base.expect("probe_from requires a failed base");
    let n = mirror.bases.len();

    let mut j = io.repair_cursor;
    while j < n {
        if j == failed_base || !channel.state.attached[j] {
            j += 1;
            continue;
        }
        let device = match &mirror.bases[j].device {
            Some(d) => d.as_ref(),
            None => {
                j += 1;
                continue;
            }
        };
        let iov = match &mut io.op {
            OpPayload::Read(v) => v,
            _ => unreachable!("repair only runs on READ"),
        };
        match device.readv_blocks_ext(io.offset_blocks, io.num_blocks, iov, &io.opts) {
            SubmitOutcome::Full => {
                io.repair_cursor = j;
                io.repair_phase = RepairPhase::Probing;
                channel.wait.park(j, io);
                return ReadOutcome::Parked;
            }
            SubmitOutcome::Err(_) | SubmitOutcome::Completed(false) => {
                j += 1;
                continue;
            }
            SubmitOutcome::Completed(true) => {
                return write_back(mirror, channel, io, failed_base);
            }
        }
    }

    warn!(mirror = %mirror.name, base = failed_base, "read repair exhausted all replicas");
    mark_faulty(mirror, channel, &io, failed_base);
    ReadOutcome::Done(false, io)
}

fn write_back(mirror: &Mirror, channel: &mut MirrorChannel, mut io: MirrorIo, failed_base: usize) -> ReadOutcome {
    let device = match &mirror.bases[failed_base].device {
        Some(d) => d.as_ref(),
        None => {
            mark_faulty(mirror, channel, &io, failed_base);
            return ReadOutcome::Done(true, io);
        }
    };
    let iov = match &io.op {
        OpPayload::Read(v) => v,
        _ => unreachable!("repair only runs on READ"),
    };
    match device.writev_blocks_ext(io.offset_blocks, io.num_blocks, iov, &io.opts) {
        SubmitOutcome::Full => {
            io.repair_phase = RepairPhase::WriteBack;
            channel.wait.park(failed_base, io);
            ReadOutcome::Parked
        }
        SubmitOutcome::Err(e) => {
            error!(mirror = %mirror.name, base = failed_base, error = %e, "read repair write-back failed");
            mark_faulty(mirror, channel, &io, failed_base);
            ReadOutcome::Done(true, io)
        }
        SubmitOutcome::Completed(false) => {
            error!(mirror = %mirror.name, base = failed_base, "read repair write-back failed");
            mark_faulty(mirror, channel, &io, failed_base);
            ReadOutcome::Done(true, io)
        }
        SubmitOutcome::Completed(true) => ReadOutcome::Done(true, io),
    }
}

pub fn resume_write_back(mirror: &Mirror, channel: &mut MirrorChannel, io: MirrorIo) -> ReadOutcome {
    let failed_base = io.repair_failed_base.expect("resume_write_back requires a failed base");
    write_back(mirror, channel, io, failed_base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use crate::device::{BaseBdev, IoOpts};
    use crate::io::DispatchOutcome;
    use crate::iovec::IoVec;
    use crate::mirror::{BaseSlot, MirrorConfig};
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
        crate::mirror::RaidModule::start(&mut mirror).unwrap();
        let channel = MirrorChannel {
            state: ChannelState::create(n, mirror.delta_tracking_enabled, mirror.num_regions()).unwrap(),
            wait: WaitQueue::new(n),
        };
        (mirror, fakes, channel)
    }

    #[test]
    fn read_repair_recovers_from_other_replica() {
        let (mirror, fakes, mut channel) = setup(2);
        fakes[0].push_read_fault(Fault::Err);
        let bytes = vec![7u8; 16 * 512];
        fakes[1].seed(1024 * 512, &bytes);

        channel.state.attached = vec![true, true];
        let mut io = crate::io::MirrorIo::new_read(1024, 16, IoVec::with_zeroed(16 * 512), IoOpts::default());
        io.submitted_base = Some(0);

        let outcome = super::super::read::resume(&mirror, &mut channel, io);
        match outcome {
            DispatchOutcome::Done(true) => {}
            _ => panic!("expected read repair to succeed"),
        }
        assert_eq!(&fakes[0].contents()[1024 * 512..1024 * 512 + bytes.len()], &bytes[..]);
    }

    #[test]
    fn read_repair_succeeds_even_if_write_back_fails() {
        let (mirror, fakes, mut channel) = setup(2);
        fakes[0].push_write_fault(Fault::Err);
        let bytes = vec![9u8; 16 * 512];
        fakes[1].seed(1024 * 512, &bytes);

        let io = crate::io::MirrorIo::new_read(1024, 16, IoVec::with_zeroed(16 * 512), IoOpts::default());
        let outcome = begin(&mirror, &mut channel, io, 0);
        match outcome {
            ReadOutcome::Done(true, _) => {}
            _ => panic!("expected SUCCESS despite write-back failure"),
        }
        assert_eq!(channel.state.base_state[0], crate::channel::BaseDevState::Faulty);
    }
}
