//! Payload buffers carried by a [`crate::io::MirrorIo`].
//!
//! The real framework addresses guest/DMA memory through raw iovecs into a
//! memory domain (see `devices::virtio::descriptor_utils::Iovec` for how
//! the teacher crate does this for guest memory). Memory-domain plumbing
//! is explicitly out of scope here (spec §1); an [`IoVec`] owns its bytes
//! outright, which is also what let read-repair reuse the exact same
//! buffers for the probe read and the write-back without a second copy.

use smallvec::SmallVec;

/// Matches the inline-capacity the teacher picks for descriptor chains
/// (`descriptor_utils::INLINE_IOVECS`) for the same reason: small requests
/// (the overwhelming majority) never touch the heap for their iovec list.
pub const INLINE_IOVECS: usize = 4;

#[derive(Clone, Debug, Default)]
pub struct IoVec {
    chunks: SmallVec<[Vec<u8>; INLINE_IOVECS]>,
}

impl IoVec {
    pub fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        IoVec {
            chunks: chunks.into_iter().collect(),
        }
    }

    /// A single buffer of `len` zeroed bytes, the common case for read
    /// destinations and process-request staging buffers.
    pub fn with_zeroed(len: usize) -> Self {
        IoVec {
            chunks: smallvec::smallvec![vec![0u8; len]],
        }
    }

    pub fn total_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Flattens into a single contiguous buffer. Used by the test harness
    /// and by the in-memory `FakeBaseDevice`; a real backend would instead
    /// drive `preadv`/`pwritev` directly over the chunk list.
    pub fn concat(&self) -> Vec<u8> {
        self.chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }

    pub fn fill_from(&mut self, src: &[u8]) {
        let mut pos = 0;
        for chunk in self.chunks.iter_mut() {
            let n = chunk.len().min(src.len() - pos);
            chunk[..n].copy_from_slice(&src[pos..pos + n]);
            pos += n;
        }
    }
}
