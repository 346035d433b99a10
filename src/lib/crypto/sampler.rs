//! Deterministic slot selection driven by a SHA-256 counter-mode stream.
//!
//! Anyone holding the same seed reproduces the same draws, with no global
//! PRNG state involved.

use alloy_primitives::B256;
use sha2::{Digest, Sha256};

/// Stream of pseudorandom `u32` words: block `i` is `sha256(seed || i_le64)`.
#[derive(Debug, Clone)]
pub struct HashStream {
    seed: B256,
    counter: u64,
    block: [u8; 32],
    offset: usize,
}

impl HashStream {
    pub fn new(seed: B256) -> Self {
        Self {
            seed,
            counter: 0,
            block: [0u8; 32],
            // Forces a refill on the first read.
            offset: 32,
        }
    }

    fn refill(&mut self) {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(self.counter.to_le_bytes());
        self.block = hasher.finalize().into();
        self.counter += 1;
        self.offset = 0;
    }

    /// Next 32-bit word (little-endian) from the stream.
    pub fn next_u32(&mut self) -> u32 {
        if self.offset + 4 > self.block.len() {
            self.refill();
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.block[self.offset..self.offset + 4]);
        self.offset += 4;
        u32::from_le_bytes(word)
    }

    /// Uniform draw from `[0, bound)` by rejection sampling.
    ///
    /// Words in the tail `[u32::MAX - u32::MAX % bound, u32::MAX]` are redrawn
    /// so every residue is equally likely. `bound` must be non-zero.
    pub fn below(&mut self, bound: u32) -> u32 {
        assert!(bound > 0, "bound must be non-zero");
        let zone = u32::MAX - u32::MAX % bound;
        loop {
            let word = self.next_u32();
            if word < zone {
                return word % bound;
            }
        }
    }
}

/// Slots `0..size` still available for placement, drawn without replacement.
#[derive(Debug, Clone)]
pub struct SlotArena {
    available: Vec<usize>,
}

impl SlotArena {
    pub fn new(size: usize) -> Self {
        Self {
            available: (0..size).collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.available.len()
    }

    /// Take one free slot chosen by `stream`, or `None` once the arena is empty.
    pub fn draw(&mut self, stream: &mut HashStream) -> Option<usize> {
        if self.available.is_empty() {
            return None;
        }
        let pick = stream.below(self.available.len() as u32) as usize;
        Some(self.available.swap_remove(pick))
    }
}
