//! Per-channel context (spec §3, §4.2): the state a single I/O-channel
//! thread owns exclusively. Nothing here is shared across channels except
//! through the hand-off protocol in [`crate::dispatch::repair`].

use crate::bitarray::BitArray;
use crate::error::{Error, Result};

/// Per-(base, channel) fault-tracking state (spec §3 "Base-device state
/// machine").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseDevState {
    None,
    Faulty,
    FaultyStopped,
}

/// State private to one (mirror, I/O channel) pair.
pub struct ChannelState {
    /// outstanding_read_blocks[i]: blocks currently in flight to base i.
    pub outstanding_read_blocks: Vec<u64>,
    /// base_state[i]: this channel's view of base i's fault state.
    pub base_state: Vec<BaseDevState>,
    /// delta_bitmaps[i]: present only once base i has been touched while
    /// faulty and delta tracking is enabled.
    pub delta_bitmaps: Vec<Option<BitArray>>,
    /// attached[i]: whether this channel holds a usable handle to base i
    /// (false for a missing slot, or a slot this channel never opened).
    /// `create`/`grow` default every entry to `true`; the caller
    /// (`Mirror::get_io_channel`/`channel_grow_base_bdev`) reconciles this
    /// against `bases[i].device.is_some()` immediately afterwards, since
    /// this type has no visibility into the base-slot list itself.
    pub attached: Vec<bool>,
    delta_tracking_enabled: bool,
    /// Number of delta-bitmap regions, ceil(blockcnt / optimal_boundary)
    /// (spec §9, reconciling the two region-size formulas).
    num_regions: u64,
    /// Rotates the starting point of `next_read_base`'s scan so that ties
    /// (the common case once completion is synchronous) cycle across
    /// replicas instead of pinning to index 0. See DESIGN.md.
    next_hint: usize,
}

impl ChannelState {
    /// `create(mirror)` (spec §4.2): zeroed counters, NONE states, no
    /// bitmaps allocated yet (lazy, first-touch per §4.5).
    pub fn create(num_bases: usize, delta_tracking_enabled: bool, num_regions: u64) -> Result<Self> {
        let mut outstanding_read_blocks = Vec::new();
        let mut base_state = Vec::new();
        let mut delta_bitmaps = Vec::new();
        let mut attached = Vec::new();
        outstanding_read_blocks
            .try_reserve(num_bases)
            .map_err(|_| Error::AllocFail)?;
        base_state.try_reserve(num_bases).map_err(|_| Error::AllocFail)?;
        delta_bitmaps.try_reserve(num_bases).map_err(|_| Error::AllocFail)?;
        attached.try_reserve(num_bases).map_err(|_| Error::AllocFail)?;
        outstanding_read_blocks.resize(num_bases, 0);
        base_state.resize(num_bases, BaseDevState::None);
        delta_bitmaps.resize_with(num_bases, || None);
        attached.resize(num_bases, true);
        Ok(ChannelState {
            outstanding_read_blocks,
            base_state,
            delta_bitmaps,
            attached,
            delta_tracking_enabled,
            num_regions,
            next_hint: 0,
        })
    }

    pub fn num_bases(&self) -> usize {
        self.base_state.len()
    }

    /// `grow(mirror)` (spec §4.2): reallocate to `new_n` bases, zero-filling
    /// appended entries. Idempotent when `new_n == num_bases()`. On failure
    /// the existing arrays are untouched (built fresh, then swapped in).
    pub fn grow(&mut self, new_n: usize) -> Result<()> {
        let old_n = self.num_bases();
        if new_n == old_n {
            return Ok(());
        }
        assert!(new_n > old_n, "channel state only grows, never shrinks");

        let mut outstanding_read_blocks = self.outstanding_read_blocks.clone();
        let mut base_state = self.base_state.clone();
        let mut attached = self.attached.clone();
        let mut delta_bitmaps: Vec<Option<BitArray>> = Vec::new();

        outstanding_read_blocks
            .try_reserve(new_n - old_n)
            .map_err(|_| Error::AllocFail)?;
        base_state.try_reserve(new_n - old_n).map_err(|_| Error::AllocFail)?;
        attached.try_reserve(new_n - old_n).map_err(|_| Error::AllocFail)?;
        delta_bitmaps.try_reserve(new_n).map_err(|_| Error::AllocFail)?;

        outstanding_read_blocks.resize(new_n, 0);
        base_state.resize(new_n, BaseDevState::None);
        attached.resize(new_n, true);
        delta_bitmaps.extend(self.delta_bitmaps.drain(..));
        delta_bitmaps.resize_with(new_n, || None);

        self.outstanding_read_blocks = outstanding_read_blocks;
        self.base_state = base_state;
        self.delta_bitmaps = delta_bitmaps;
        self.attached = attached;
        Ok(())
    }

    /// `next_read_base` (spec §4.3): the attached base minimizing
    /// outstanding read blocks, ties broken by a rotating start point
    /// (see `next_hint`) rather than strictly the lowest index.
    pub fn next_read_base(&mut self) -> Option<usize> {
        let n = self.num_bases();
        if n == 0 {
            return None;
        }
        let mut best: Option<(usize, u64)> = None;
        for k in 0..n {
            let i = (self.next_hint + k) % n;
            if !self.attached[i] {
                continue;
            }
            let outstanding = self.outstanding_read_blocks[i];
            if best.map(|(_, b)| outstanding < b).unwrap_or(true) {
                best = Some((i, outstanding));
            }
        }
        if let Some((i, _)) = best {
            self.next_hint = (i + 1) % n;
        }
        best.map(|(i, _)| i)
    }

    /// `handle_faulty_base` (spec §4.5): lazily ensures a per-channel delta
    /// bitmap exists for `base`, then marks `[start_region, end_region]`
    /// dirty. No-ops (no tracking) once the base is FAULTY_STOPPED.
    pub fn handle_faulty_base(&mut self, base: usize, start_region: u64, end_region: u64) {
        if !self.delta_tracking_enabled {
            return;
        }
        match self.base_state[base] {
            BaseDevState::FaultyStopped => return,
            BaseDevState::None | BaseDevState::Faulty => {}
        }
        if self.delta_bitmaps[base].is_none() {
            match BitArray::create(self.num_regions) {
                Some(bm) => {
                    self.delta_bitmaps[base] = Some(bm);
                    self.base_state[base] = BaseDevState::Faulty;
                }
                None => {
                    self.base_state[base] = BaseDevState::FaultyStopped;
                    return;
                }
            }
        }
        if let Some(bm) = &mut self.delta_bitmaps[base] {
            bm.set_range(start_region, end_region);
        }
    }

    /// External hand-off (spec §4.5 "Channel hand-off on external state
    /// change"). `base_delta_bitmap` is the mirror-owned (base-slot)
    /// bitmap, mutated in place on FAULTY -> FAULTY_STOPPED.
    pub fn request_state(
        &mut self,
        base: usize,
        new_state: BaseDevState,
        base_delta_bitmap: &mut Option<BitArray>,
    ) -> Result<()> {
        use BaseDevState::*;
        let current = self.base_state[base];
        match (current, new_state) {
            (None, Faulty) => {
                let bm = BitArray::create(self.num_regions).ok_or(Error::AllocFail)?;
                self.delta_bitmaps[base] = Some(bm);
                self.base_state[base] = Faulty;
                Ok(())
            }
            (Faulty, FaultyStopped) => {
                if let Some(src) = &self.delta_bitmaps[base] {
                    match base_delta_bitmap {
                        Some(dst) => dst.or_from(src),
                        None => {
                            let mut dst = BitArray::create(self.num_regions).ok_or(Error::AllocFail)?;
                            dst.or_from(src);
                            *base_delta_bitmap = Some(dst);
                        }
                    }
                }
                self.base_state[base] = FaultyStopped;
                Ok(())
            }
            (Faulty, None) | (FaultyStopped, None) => {
                self.delta_bitmaps[base] = None;
                self.base_state[base] = None;
                Ok(())
            }
            (FaultyStopped, Faulty) => Err(Error::AllocFail),
            (s, t) if s == t => Ok(()),
            (s, t) => Err(Error::InvalidArg(format!("no transition {s:?} -> {t:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_zeroes_everything() {
        let c = ChannelState::create(3, true, 16).unwrap();
        assert_eq!(c.outstanding_read_blocks, vec![0, 0, 0]);
        assert!(c.base_state.iter().all(|s| *s == BaseDevState::None));
        assert!(c.delta_bitmaps.iter().all(Option::is_none));
    }

    #[test]
    fn grow_preserves_existing_and_zero_fills_new() {
        let mut c = ChannelState::create(2, false, 16).unwrap();
        c.outstanding_read_blocks[1] = 7;
        c.grow(4).unwrap();
        assert_eq!(c.num_bases(), 4);
        assert_eq!(c.outstanding_read_blocks, vec![0, 7, 0, 0]);
    }

    #[test]
    fn grow_is_idempotent_when_unchanged() {
        let mut c = ChannelState::create(3, false, 16).unwrap();
        c.outstanding_read_blocks[0] = 5;
        c.grow(3).unwrap();
        assert_eq!(c.outstanding_read_blocks, vec![5, 0, 0]);
    }

    #[test]
    fn next_read_base_prefers_least_outstanding() {
        let mut c = ChannelState::create(3, false, 16).unwrap();
        c.outstanding_read_blocks = vec![4, 0, 2];
        assert_eq!(c.next_read_base(), Some(1));
    }

    #[test]
    fn next_read_base_rotates_on_ties() {
        let mut c = ChannelState::create(3, false, 16).unwrap();
        let first = c.next_read_base().unwrap();
        let second = c.next_read_base().unwrap();
        let third = c.next_read_base().unwrap();
        assert_eq!([first, second, third].iter().copied().collect::<std::collections::HashSet<_>>().len(), 3);
    }

    #[test]
    fn next_read_base_skips_unattached() {
        let mut c = ChannelState::create(2, false, 16).unwrap();
        c.attached[0] = false;
        assert_eq!(c.next_read_base(), Some(1));
    }

    #[test]
    fn handle_faulty_base_sets_region_and_downgrades_on_oom() {
        let mut c = ChannelState::create(1, true, 4).unwrap();
        c.handle_faulty_base(0, 1, 2);
        assert_eq!(c.base_state[0], BaseDevState::Faulty);
        let bm = c.delta_bitmaps[0].as_ref().unwrap();
        assert!(bm.get(1));
        assert!(bm.get(2));
        assert!(!bm.get(0));
    }

    #[test]
    fn faulty_stopped_hand_off_ors_into_base_bitmap() {
        let mut c = ChannelState::create(1, true, 4).unwrap();
        c.handle_faulty_base(0, 0, 1);
        let mut base_bm: Option<BitArray> = None;
        c.request_state(0, BaseDevState::FaultyStopped, &mut base_bm).unwrap();
        assert_eq!(c.base_state[0], BaseDevState::FaultyStopped);
        let bm = base_bm.unwrap();
        assert!(bm.get(0));
        assert!(bm.get(1));
    }

    #[test]
    fn faulty_stopped_to_faulty_is_rejected() {
        let mut c = ChannelState::create(1, true, 4).unwrap();
        c.base_state[0] = BaseDevState::FaultyStopped;
        let mut base_bm = None;
        let err = c.request_state(0, BaseDevState::Faulty, &mut base_bm).unwrap_err();
        assert!(matches!(err, Error::AllocFail));
    }
}
