//! In-memory base device double with injectable fault sequences, used
//! across dispatcher tests. Analogous to the bdev test harness SPDK uses
//! to inject -ENOMEM/-EIO at the submission boundary.
#![cfg(test)]

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::device::{BaseBdev, IoOpts, SubmitOutcome};
use crate::error::Error;
use crate::iovec::IoVec;

/// A scripted outcome to return instead of performing the real operation.
#[derive(Clone, Debug)]
pub enum Fault {
    Full,
    Err,
}

pub struct FakeBaseDevice {
    data: Mutex<Vec<u8>>,
    block_size: u64,
    optimal_io_boundary: u32,
    read_faults: Mutex<VecDeque<Fault>>,
    write_faults: Mutex<VecDeque<Fault>>,
    unmap_faults: Mutex<VecDeque<Fault>>,
    flush_faults: Mutex<VecDeque<Fault>>,
}

impl FakeBaseDevice {
    pub fn new(size_blocks: u64, block_size: u64, optimal_io_boundary: u32) -> Self {
        FakeBaseDevice {
            data: Mutex::new(vec![0u8; (size_blocks * block_size) as usize]),
            block_size,
            optimal_io_boundary,
            read_faults: Mutex::new(VecDeque::new()),
            write_faults: Mutex::new(VecDeque::new()),
            unmap_faults: Mutex::new(VecDeque::new()),
            flush_faults: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_read_fault(&self, f: Fault) {
        self.read_faults.lock().push_back(f);
    }

    pub fn push_write_fault(&self, f: Fault) {
        self.write_faults.lock().push_back(f);
    }

    pub fn push_unmap_fault(&self, f: Fault) {
        self.unmap_faults.lock().push_back(f);
    }

    pub fn push_flush_fault(&self, f: Fault) {
        self.flush_faults.lock().push_back(f);
    }

    /// Seeds the backing store directly, bypassing `writev_blocks_ext`.
    pub fn seed(&self, offset_bytes: usize, bytes: &[u8]) {
        let mut data = self.data.lock();
        data[offset_bytes..offset_bytes + bytes.len()].copy_from_slice(bytes);
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn take_fault(q: &Mutex<VecDeque<Fault>>) -> Option<Fault> {
        q.lock().pop_front()
    }
}

impl BaseBdev for FakeBaseDevice {
    fn readv_blocks_ext(
        &self,
        offset_blocks: u64,
        num_blocks: u64,
        iov: &mut IoVec,
        _opts: &IoOpts,
    ) -> SubmitOutcome {
        match Self::take_fault(&self.read_faults) {
            Some(Fault::Full) => return SubmitOutcome::Full,
            Some(Fault::Err) => return SubmitOutcome::Err(Error::PermanentIo(std::io::Error::other("fake read fault"))),
            None => {}
        }
        let off = (offset_blocks * self.block_size) as usize;
        let len = (num_blocks * self.block_size) as usize;
        let data = self.data.lock();
        iov.fill_from(&data[off..off + len]);
        SubmitOutcome::Completed(true)
    }

    fn writev_blocks_ext(
        &self,
        offset_blocks: u64,
        num_blocks: u64,
        iov: &IoVec,
        _opts: &IoOpts,
    ) -> SubmitOutcome {
        match Self::take_fault(&self.write_faults) {
            Some(Fault::Full) => return SubmitOutcome::Full,
            Some(Fault::Err) => return SubmitOutcome::Err(Error::PermanentIo(std::io::Error::other("fake write fault"))),
            None => {}
        }
        let off = (offset_blocks * self.block_size) as usize;
        let len = (num_blocks * self.block_size) as usize;
        let buf = iov.concat();
        let mut data = self.data.lock();
        data[off..off + len].copy_from_slice(&buf[..len]);
        SubmitOutcome::Completed(true)
    }

    fn unmap_blocks(&self, offset_blocks: u64, num_blocks: u64) -> SubmitOutcome {
        match Self::take_fault(&self.unmap_faults) {
            Some(Fault::Full) => return SubmitOutcome::Full,
            Some(Fault::Err) => return SubmitOutcome::Err(Error::PermanentIo(std::io::Error::other("fake unmap fault"))),
            None => {}
        }
        let off = (offset_blocks * self.block_size) as usize;
        let len = (num_blocks * self.block_size) as usize;
        let mut data = self.data.lock();
        data[off..off + len].fill(0);
        SubmitOutcome::Completed(true)
    }

    fn flush_blocks(&self, _offset_blocks: u64, _num_blocks: u64) -> SubmitOutcome {
        match Self::take_fault(&self.flush_faults) {
            Some(Fault::Full) => SubmitOutcome::Full,
            Some(Fault::Err) => SubmitOutcome::Err(Error::PermanentIo(std::io::Error::other("fake flush fault"))),
            None => SubmitOutcome::Completed(true),
        }
    }

    fn data_size_blocks(&self) -> u64 {
        self.data.lock().len() as u64 / self.block_size
    }

    fn optimal_io_boundary(&self) -> u32 {
        self.optimal_io_boundary
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }
}
