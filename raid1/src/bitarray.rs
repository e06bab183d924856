//! Fixed-capacity bit set, used both as the faulty-base delta bitmap and
//! as the fragmap scanner's cluster allocation map.
//!
//! Bit `i` lives in word `i / 64`, bit position `i % 64` within that word.
//! `to_base64` encodes the words little-endian, so the wire format is
//! stable across platforms regardless of host endianness.

use base64::{engine::general_purpose::STANDARD, Engine};

const BITS_PER_WORD: u64 = 64;

/// A bit set with a capacity fixed at construction time.
#[derive(Clone)]
pub struct BitArray {
    words: Vec<u64>,
    capacity: u64,
}

impl BitArray {
    /// Allocates a bit-array of the given capacity, all bits clear.
    ///
    /// Returns `None` in place of the C source's OOM return; callers that
    /// need to downgrade to `FAULTY_STOPPED` on failure match on `None`
    /// the same way the original matches on a null `spdk_bit_array_create`.
    pub fn create(capacity: u64) -> Option<Self> {
        let num_words = capacity.div_ceil(BITS_PER_WORD) as usize;
        // A genuinely oversized capacity should fail allocation rather than
        // panic; `try_reserve` surfaces that without aborting.
        let mut words = Vec::new();
        words.try_reserve(num_words).ok()?;
        words.resize(num_words, 0);
        Some(BitArray { words, capacity })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn locate(&self, index: u64) -> (usize, u32) {
        assert!(
            index < self.capacity,
            "bit index {index} out of range (capacity {})",
            self.capacity
        );
        ((index / BITS_PER_WORD) as usize, (index % BITS_PER_WORD) as u32)
    }

    pub fn set(&mut self, index: u64) {
        let (word, bit) = self.locate(index);
        self.words[word] |= 1u64 << bit;
    }

    pub fn clear(&mut self, index: u64) {
        let (word, bit) = self.locate(index);
        self.words[word] &= !(1u64 << bit);
    }

    pub fn get(&self, index: u64) -> bool {
        let (word, bit) = self.locate(index);
        self.words[word] & (1u64 << bit) != 0
    }

    /// Sets every bit in the inclusive range `[start, end]`.
    pub fn set_range(&mut self, start: u64, end: u64) {
        for i in start..=end {
            self.set(i);
        }
    }

    /// Bitwise-ORs `other` into `self`, bit for bit, up to `self`'s capacity.
    /// Used for the FAULTY -> FAULTY_STOPPED channel hand-off (§4.5).
    pub fn or_from(&mut self, other: &BitArray) {
        let n = self.capacity.min(other.capacity);
        for i in 0..n {
            if other.get(i) {
                self.set(i);
            }
        }
    }

    /// Counts the number of set bits.
    pub fn count_set(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Encodes the raw little-endian packed bits as base64, matching
    /// `spdk_bit_array_to_base64`'s wire representation.
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(self.words.len() * 8);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        STANDARD.encode(bytes)
    }
}
