//! Back-pressure queue (spec §5 "Back-pressure").
//!
//! The real framework's `queue_io_wait` multiplexes resumption onto
//! whichever reactor woke the base device up; this crate has no event loop
//! of its own (the mirror module sits inside a host framework's scheduler),
//! so a per-channel, per-base `VecDeque` guarded by a `parking_lot::Mutex`
//! is enough — the owning channel thread is the only thread that ever
//! touches its own wait queues. This replaces the teacher's lock-free
//! multi-waker `gruel::signals` machinery, which exists to multiplex
//! *device interrupts* onto an epoll reactor, a concern this module does
//! not have.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::io::MirrorIo;

/// One wait list per base device, scoped to a single channel.
pub struct WaitQueue {
    queues: Vec<Mutex<VecDeque<MirrorIo>>>,
}

impl WaitQueue {
    pub fn new(num_bases: usize) -> Self {
        WaitQueue {
            queues: (0..num_bases).map(|_| Mutex::new(VecDeque::new())).collect(),
        }
    }

    pub fn grow(&mut self, new_n: usize) {
        while self.queues.len() < new_n {
            self.queues.push(Mutex::new(VecDeque::new()));
        }
    }

    /// Parks `io` on base `base_idx`'s wait list; resumed from
    /// `io.submitted`/`io.repair_cursor` when that base becomes
    /// submittable again, via [`WaitQueue::drain`].
    pub fn park(&self, base_idx: usize, io: MirrorIo) {
        self.queues[base_idx].lock().push_back(io);
    }

    /// Removes and returns every `mirror_io` parked on `base_idx`, in FIFO
    /// order. The caller re-enters the appropriate dispatcher for each.
    pub fn drain(&self, base_idx: usize) -> Vec<MirrorIo> {
        self.queues[base_idx].lock().drain(..).collect()
    }

    pub fn is_empty(&self, base_idx: usize) -> bool {
        self.queues[base_idx].lock().is_empty()
    }
}
