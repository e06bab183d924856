//! Fragmap scanner (spec §4.6): builds a cluster-granularity allocation
//! bitmap for a logical volume by alternating SEEK_DATA / SEEK_HOLE.
//!
//! The source API (`spdk_bdev_seek_data`/`seek_hole`) reports block
//! numbers through an async completion; we call `libc::lseek` directly
//! against the host file descriptor, which reports byte offsets, so the
//! "current = b·block_size" step in the original algorithm collapses to
//! just tracking byte offsets throughout — there is no block-number
//! intermediate to convert back. The two-state alternation and the
//! validation order are unchanged.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use crate::bitarray::BitArray;
use crate::error::{Error, Result};

pub struct FragmapResult {
    pub cluster_size: u64,
    pub num_clusters: u64,
    pub num_allocated_clusters: u64,
    pub bitmap: BitArray,
}

impl FragmapResult {
    pub fn fragmap_base64(&self) -> String {
        self.bitmap.to_base64()
    }
}

/// Scans `[offset, offset + size)` of `file` (whose total extent is
/// `device_size` bytes) for allocated clusters of `cluster_size` bytes.
/// `size == 0` means "to the end of the device" (spec §6 supplement from
/// `vbdev_lvol_rpc.c`). Bounds are checked before alignment, matching the
/// original's validation order, so a misaligned-and-out-of-range request
/// reports out-of-range.
pub fn scan(file: &File, device_size: u64, offset: u64, size: u64, cluster_size: u64) -> Result<FragmapResult> {
    let segment_size = if size == 0 {
        device_size.checked_sub(offset).ok_or_else(|| Error::InvalidArg("offset beyond device size".into()))?
    } else {
        size
    };

    if offset.checked_add(segment_size).map(|end| end > device_size).unwrap_or(true) {
        return Err(Error::InvalidArg("offset + size exceeds device size".into()));
    }
    if cluster_size == 0 || offset % cluster_size != 0 || segment_size % cluster_size != 0 {
        return Err(Error::InvalidArg("offset and size must be cluster-aligned".into()));
    }

    let num_clusters = segment_size / cluster_size;
    let mut bitmap = BitArray::create(num_clusters).ok_or(Error::AllocFail)?;
    let mut num_allocated_clusters = 0u64;

    let fd = file.as_raw_fd();
    let end = offset + segment_size;
    let mut current = offset;

    while current < end {
        let data_pos = match seek(fd, current, libc::SEEK_DATA)? {
            Some(p) => p,
            None => break,
        };
        current = data_pos;
        let hole_pos = seek(fd, current, libc::SEEK_HOLE)?.unwrap_or(end);
        let next = hole_pos.min(end);

        if next > current {
            let start_cluster = (current - offset) / cluster_size;
            let end_cluster = (next - offset) / cluster_size;
            if end_cluster > start_cluster {
                bitmap.set_range(start_cluster, end_cluster - 1);
                num_allocated_clusters += end_cluster - start_cluster;
            }
        }
        current = next;
    }

    Ok(FragmapResult {
        cluster_size,
        num_clusters,
        num_allocated_clusters,
        bitmap,
    })
}

/// `lseek(fd, pos, whence)`, returning `None` for the SEEK_DATA "no more
/// data past this offset" case (ENXIO) instead of an error.
fn seek(fd: RawFd, pos: u64, whence: i32) -> Result<Option<u64>> {
    let pos = i64::try_from(pos).map_err(|_| Error::InvalidArg("seek position overflows i64".into()))?;
    let r = unsafe { libc::lseek(fd, pos, whence) };
    if r < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENXIO) {
            return Ok(None);
        }
        return Err(err.into());
    }
    Ok(Some(r as u64))
}
