//! The `BaseBdev` abstraction: the framework-to-base-device interfaces the
//! core consumes (spec §6). The generic RAID framework's base-device
//! discovery, superblock handling, and the block-device abstraction itself
//! are out of scope (spec §1) — this trait is the seam the core actually
//! calls through.
//!
//! Each method is non-blocking in spirit: it returns a [`SubmitOutcome`]
//! rather than blocking the caller. The teacher's own block worker
//! (`devices::virtio::block::worker::BlockWorker::process_request`)
//! performs its file I/O synchronously inside one queue-processing pass
//! and reports the outcome immediately; our base devices follow the same
//! shape; so "submission" and "completion" coincide in the `Completed`
//! variant. A real asynchronous backend would instead stash the
//! completion and invoke it from a reactor thread, but the dispatcher
//! logic in `dispatch/` does not depend on which happens — it only reacts
//! to `SubmitOutcome`.
use nix::sys::uio::{pread, pwrite};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;
use crate::iovec::IoVec;

/// Opaque memory-domain handle, forwarded unchanged (spec §6) but never
/// interpreted by the mirror core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryDomainHandle(pub u64);

/// Per-IO options forwarded unchanged to every base device call.
#[derive(Clone, Debug, Default)]
pub struct IoOpts {
    pub memory_domain: Option<MemoryDomainHandle>,
    pub metadata: Option<Vec<u8>>,
}

/// The three-way result of a submission attempt: accepted-and-settled,
/// transient back-pressure, or a permanent failure. Mirrors the
/// 0 / -ENOMEM / <0 contract of `spdk_bdev_{readv,writev}_blocks_ext`.
#[derive(Debug)]
pub enum SubmitOutcome {
    Completed(bool),
    Full,
    Err(Error),
}

/// The base-device interfaces the core consumes: `readv_blocks_ext`,
/// `writev_blocks_ext`, `unmap_blocks`, `flush_blocks` (spec §6).
pub trait BaseBdev: Send + Sync {
    fn readv_blocks_ext(
        &self,
        offset_blocks: u64,
        num_blocks: u64,
        iov: &mut IoVec,
        opts: &IoOpts,
    ) -> SubmitOutcome;

    fn writev_blocks_ext(
        &self,
        offset_blocks: u64,
        num_blocks: u64,
        iov: &IoVec,
        opts: &IoOpts,
    ) -> SubmitOutcome;

    fn unmap_blocks(&self, offset_blocks: u64, num_blocks: u64) -> SubmitOutcome;

    fn flush_blocks(&self, offset_blocks: u64, num_blocks: u64) -> SubmitOutcome;

    /// Data size in blocks, used for min-block-count computation at start
    /// and resize (spec §4.7).
    fn data_size_blocks(&self) -> u64;

    /// Optimal IO boundary in blocks, reused as the delta-bitmap region
    /// size (spec §3, glossary "optimal IO boundary").
    fn optimal_io_boundary(&self) -> u32;

    /// Block size in bytes, inherited by the mirror (spec §3 "Mirror").
    fn block_size(&self) -> u64;
}

/// A base device backed by a plain host file, grounded on
/// `devices::virtio::block::device::DiskProperties` — simplified because
/// the mirror module has no guest memory or cache-type-aware flush policy
/// of its own; the surrounding framework that would configure those is
/// out of scope here (spec §1).
pub struct FileBaseBdev {
    file: File,
    block_size: u64,
    data_size_blocks: u64,
    optimal_io_boundary: u32,
    // not functionally required, but cheap and used by tests exercising
    // concurrent submission ordering.
    submit_count: AtomicU64,
}

impl FileBaseBdev {
    pub fn open(
        path: &Path,
        read_only: bool,
        block_size: u64,
        optimal_io_boundary: u32,
    ) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(!read_only).open(path)?;
        let len = file.metadata()?.len();
        if len % block_size != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file size {len} is not a multiple of block size {block_size}"),
            ));
        }
        Ok(FileBaseBdev {
            file,
            block_size,
            data_size_blocks: len / block_size,
            optimal_io_boundary,
            submit_count: AtomicU64::new(0),
        })
    }

    fn byte_offset(&self, offset_blocks: u64) -> i64 {
        (offset_blocks * self.block_size) as i64
    }
}

impl BaseBdev for FileBaseBdev {
    fn readv_blocks_ext(
        &self,
        offset_blocks: u64,
        num_blocks: u64,
        iov: &mut IoVec,
        _opts: &IoOpts,
    ) -> SubmitOutcome {
        self.submit_count.fetch_add(1, Ordering::Relaxed);
        let want = (num_blocks * self.block_size) as usize;
        if iov.total_len() != want {
            return SubmitOutcome::Err(Error::InvalidArg(format!(
                "iovec length {} does not match requested {want} bytes",
                iov.total_len()
            )));
        }
        let mut buf = vec![0u8; want];
        match pread(self.file.as_raw_fd(), &mut buf, self.byte_offset(offset_blocks)) {
            Ok(n) if n == want => {
                iov.fill_from(&buf);
                SubmitOutcome::Completed(true)
            }
            Ok(_) => SubmitOutcome::Completed(false),
            Err(e) => SubmitOutcome::Err(io::Error::from(e).into()),
        }
    }

    fn writev_blocks_ext(
        &self,
        offset_blocks: u64,
        num_blocks: u64,
        iov: &IoVec,
        _opts: &IoOpts,
    ) -> SubmitOutcome {
        self.submit_count.fetch_add(1, Ordering::Relaxed);
        let want = (num_blocks * self.block_size) as usize;
        let buf = iov.concat();
        if buf.len() != want {
            return SubmitOutcome::Err(Error::InvalidArg(format!(
                "iovec length {} does not match requested {want} bytes",
                buf.len()
            )));
        }
        match pwrite(&self.file, &buf, self.byte_offset(offset_blocks)) {
            Ok(n) if n == want => SubmitOutcome::Completed(true),
            Ok(_) => SubmitOutcome::Completed(false),
            Err(e) => SubmitOutcome::Err(io::Error::from(e).into()),
        }
    }

    fn unmap_blocks(&self, _offset_blocks: u64, _num_blocks: u64) -> SubmitOutcome {
        // Punching holes is a best-effort host-filesystem concern; see
        // `DiskProperties::punch_hole` in the teacher for the F_PUNCHHOLE
        // path. Plain files on a portable backend simply no-op.
        SubmitOutcome::Completed(true)
    }

    fn flush_blocks(&self, _offset_blocks: u64, _num_blocks: u64) -> SubmitOutcome {
        match self.file.sync_all() {
            Ok(()) => SubmitOutcome::Completed(true),
            Err(e) => SubmitOutcome::Err(e.into()),
        }
    }

    fn data_size_blocks(&self) -> u64 {
        self.data_size_blocks
    }

    fn optimal_io_boundary(&self) -> u32 {
        self.optimal_io_boundary
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }
}
