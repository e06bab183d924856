//! Mirror lifecycle and the module-to-framework surface (spec §4.7, §6).

use std::sync::Arc;

use tracing::{info, warn};

use crate::bitarray::BitArray;
use crate::channel::{BaseDevState, ChannelState};
use crate::device::BaseBdev;
use crate::dispatch::{process, read, write};
use crate::error::{Error, Result};
use crate::io::{DispatchOutcome, MirrorIo, OpPayload};
use crate::waitqueue::WaitQueue;

/// Module attributes (spec §6): `level = "raid1"`, one base device is
/// enough to start, one must stay operational.
pub struct ModuleInfo {
    pub level: &'static str,
    pub base_bdevs_min: usize,
    pub min_operational: usize,
    pub memory_domains_supported: bool,
}

pub const MODULE_INFO: ModuleInfo = ModuleInfo {
    level: "raid1",
    base_bdevs_min: 1,
    min_operational: 1,
    memory_domains_supported: true,
};

/// Construction-time parameters (spec §9 ambient "Configuration" — no
/// persisted config file, the mirror is parameterized by its caller).
#[derive(Clone, Copy, Debug, Default)]
pub struct MirrorConfig {
    pub delta_tracking_enabled: bool,
}

/// One underlying replica (spec §3 "Base-device slot"). A slot with
/// `device: None` is a "missing" slot.
pub struct BaseSlot {
    pub device: Option<Arc<dyn BaseBdev>>,
    pub data_offset: u64,
    pub data_size: u64,
    /// Mirror-owned delta bitmap, populated only via the FAULTY ->
    /// FAULTY_STOPPED channel hand-off (spec §4.5).
    pub delta_bitmap: Option<BitArray>,
}

impl BaseSlot {
    pub fn present(device: Arc<dyn BaseBdev>, data_offset: u64) -> Self {
        let data_size = device.data_size_blocks();
        BaseSlot {
            device: Some(device),
            data_offset,
            data_size,
            delta_bitmap: None,
        }
    }

    pub fn missing() -> Self {
        BaseSlot {
            device: None,
            data_offset: 0,
            data_size: 0,
            delta_bitmap: None,
        }
    }
}

/// A per-I/O-channel handle (spec §3 "Per-channel state", Glossary
/// "Channel"). Exclusively owned by whichever scheduler thread created it.
pub struct MirrorChannel {
    pub state: ChannelState,
    pub wait: WaitQueue,
}

/// The mirrored virtual block device (spec §3 "Mirror").
pub struct Mirror {
    pub name: String,
    pub bases: Vec<BaseSlot>,
    pub block_count: u64,
    pub block_size: u64,
    pub optimal_io_boundary: u32,
    pub delta_tracking_enabled: bool,
    num_regions: u64,
}

/// Module-to-framework callbacks (spec §6). The generic RAID framework
/// that would invoke these — base-device discovery, superblock handling —
/// is out of scope; this trait is the seam it calls through.
pub trait RaidModule {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> bool;
    fn get_io_channel(&self) -> MirrorChannel;
    fn submit_rw_request(&self, channel: &mut MirrorChannel, io: MirrorIo) -> DispatchOutcome;
    fn submit_null_payload_request(&self, channel: &mut MirrorChannel, io: MirrorIo) -> DispatchOutcome;
    fn submit_process_request(
        &mut self,
        channel: &mut MirrorChannel,
        req: process::ProcessRequest,
    ) -> DispatchOutcome;
    fn resize(&mut self) -> bool;
    fn channel_grow_base_bdev(&self, channel: &mut MirrorChannel) -> Result<()>;
    fn channel_faulty_base_bdev(
        &mut self,
        channel: &mut MirrorChannel,
        base: usize,
        new_state: BaseDevState,
    ) -> Result<()>;
}

impl Mirror {
    /// Constructs a mirror from already-resolved base slots. `start`
    /// performs the actual size/boundary reconciliation (spec §4.7); this
    /// just wires the fixed slot list together (position is stable for
    /// the mirror's lifetime, spec §3).
    pub fn new(name: impl Into<String>, bases: Vec<BaseSlot>, config: MirrorConfig) -> Self {
        Mirror {
            name: name.into(),
            bases,
            block_count: 0,
            block_size: 0,
            optimal_io_boundary: 0,
            delta_tracking_enabled: config.delta_tracking_enabled,
            num_regions: 0,
        }
    }

    pub fn num_regions(&self) -> u64 {
        self.num_regions
    }

    fn present_bases(&self) -> impl Iterator<Item = &BaseSlot> {
        self.bases.iter().filter(|b| b.device.is_some())
    }
}

impl RaidModule for Mirror {
    /// spec §4.7 "Start".
    fn start(&mut self) -> Result<()> {
        let min_block_count = self
            .present_bases()
            .map(|b| b.data_size)
            .min()
            .ok_or(Error::MissingReplica)?;
        let min_optimal_boundary = self
            .present_bases()
            .map(|b| b.device.as_ref().unwrap().optimal_io_boundary() as u64)
            .min()
            .unwrap_or(0);

        if self.delta_tracking_enabled && min_optimal_boundary == 0 {
            return Err(Error::InvalidArg(
                "delta tracking enabled but optimal IO boundary is zero".into(),
            ));
        }

        self.block_size = self
            .present_bases()
            .next()
            .map(|b| b.device.as_ref().unwrap().block_size())
            .ok_or(Error::MissingReplica)?;

        for base in &mut self.bases {
            if base.device.is_some() {
                base.data_size = min_block_count;
            }
        }

        self.block_count = min_block_count;
        self.optimal_io_boundary = min_optimal_boundary as u32;
        self.num_regions = if min_optimal_boundary == 0 {
            0
        } else {
            min_block_count.div_ceil(min_optimal_boundary)
        };

        info!(
            mirror = %self.name,
            block_count = self.block_count,
            optimal_io_boundary = self.optimal_io_boundary,
            "mirror started"
        );
        Ok(())
    }

    /// spec §4.7 "Stop": the framework drains channels first; this just
    /// reports that stop is asynchronous from the module's perspective.
    fn stop(&mut self) -> bool {
        info!(mirror = %self.name, "mirror stop requested");
        false
    }

    fn get_io_channel(&self) -> MirrorChannel {
        let n = self.bases.len();
        let mut state = ChannelState::create(n, self.delta_tracking_enabled, self.num_regions)
            .expect("channel allocation should not fail in this harness");
        for (i, base) in self.bases.iter().enumerate() {
            state.attached[i] = base.device.is_some();
        }
        MirrorChannel {
            state,
            wait: WaitQueue::new(n),
        }
    }

    fn submit_rw_request(&self, channel: &mut MirrorChannel, io: MirrorIo) -> DispatchOutcome {
        match &io.op {
            OpPayload::Read(_) => read::submit_read(self, channel, io),
            OpPayload::Write(_) => write::submit_write(self, channel, io),
            _ => unreachable!("submit_rw_request only takes READ/WRITE"),
        }
    }

    fn submit_null_payload_request(&self, channel: &mut MirrorChannel, io: MirrorIo) -> DispatchOutcome {
        match &io.op {
            OpPayload::Unmap | OpPayload::Flush => write::submit_write(self, channel, io),
            _ => unreachable!("submit_null_payload_request only takes UNMAP/FLUSH"),
        }
    }

    fn submit_process_request(
        &mut self,
        channel: &mut MirrorChannel,
        req: process::ProcessRequest,
    ) -> DispatchOutcome {
        process::submit_process_request(self, channel, req)
    }

    /// spec §4.7 "Resize".
    fn resize(&mut self) -> bool {
        let new_min = match self
            .bases
            .iter()
            .filter(|b| b.device.is_some())
            .map(|b| {
                b.device.as_ref().unwrap().data_size_blocks() - b.data_offset
            })
            .min()
        {
            Some(v) => v,
            None => return false,
        };
        if new_min == self.block_count {
            return false;
        }
        self.block_count = new_min;
        self.num_regions = if self.optimal_io_boundary == 0 {
            0
        } else {
            new_min.div_ceil(self.optimal_io_boundary as u64)
        };
        for base in &mut self.bases {
            if base.device.is_some() {
                base.data_size = new_min;
            }
        }
        info!(mirror = %self.name, new_block_count = new_min, "mirror resized");
        true
    }

    /// spec §4.2 "grow": invoked when a base device is added to the
    /// mirror and every existing channel must widen its per-base arrays.
    fn channel_grow_base_bdev(&self, channel: &mut MirrorChannel) -> Result<()> {
        let n = self.bases.len();
        channel.state.grow(n)?;
        channel.wait.grow(n);
        for (i, base) in self.bases.iter().enumerate() {
            channel.state.attached[i] = base.device.is_some();
        }
        Ok(())
    }

    /// spec §4.5 "Channel hand-off on external state change".
    fn channel_faulty_base_bdev(
        &mut self,
        channel: &mut MirrorChannel,
        base: usize,
        new_state: BaseDevState,
    ) -> Result<()> {
        let result = channel
            .state
            .request_state(base, new_state, &mut self.bases[base].delta_bitmap);
        if result.is_ok() && new_state == BaseDevState::Faulty {
            warn!(mirror = %self.name, base, "base device marked faulty");
        }
        result
    }
}

/// Externally mark a base device failed (spec §6 `fail_base_bdev`). The
/// generic framework owns the actual bdev registry; this only updates the
/// channel-local view so dispatch stops routing to it.
pub fn fail_base_bdev(channel: &mut MirrorChannel, base: usize) {
    channel.state.attached[base] = false;
}

/// Drives every `mirror_io` parked on `base`'s wait list back through the
/// dispatcher it belongs to (spec §5 "Back-pressure": "When the base
/// later becomes submittable it invokes the resume function on the same
/// channel thread"). Returns each one's terminal status, in resume order;
/// an entry still `Parked` means it hit back-pressure again immediately.
pub fn resume_base(mirror: &Mirror, channel: &mut MirrorChannel, base: usize) -> Vec<DispatchOutcome> {
    let parked = channel.wait.drain(base);
    parked
        .into_iter()
        .map(|io| match &io.op {
            OpPayload::Read(_) if io.process_target.is_some() => process::resume(mirror, channel, io),
            OpPayload::Read(_) => read::resume(mirror, channel, io),
            OpPayload::Write(_) | OpPayload::Unmap | OpPayload::Flush => write::resume(mirror, channel, io),
        })
        .collect()
}
