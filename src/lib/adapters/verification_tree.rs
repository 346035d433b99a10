use alloy_primitives::B256;

use crate::crypto::accumulator::{accum, Tweak};
use crate::domain::encoding::decode_path;
use crate::domain::merkle::PathProof;
use crate::domain::params::VERIFICATION_MERKLE_DEPTH;
use crate::ports::ledger::LedgerError;

/// Append-only Merkle tree over verification hashes with root history tracking.
///
/// Unfilled positions hold precomputed zero subtrees, so only the populated
/// prefix of each level is stored. Every insertion records the new root;
/// preparations may reference any historical root.
pub struct VerificationTree {
    /// `nodes[l]` holds the populated prefix of level `l` (leaves at level 0).
    nodes: Vec<Vec<B256>>,
    /// `zeros[l]` is the root of an empty subtree of height `l`.
    zeros: Vec<B256>,
    root_history: Vec<B256>,
}

impl VerificationTree {
    pub fn new() -> Self {
        let mut zeros = Vec::with_capacity(VERIFICATION_MERKLE_DEPTH + 1);
        zeros.push(B256::ZERO);
        for level in 0..VERIFICATION_MERKLE_DEPTH {
            let below = zeros[level];
            zeros.push(accum(below, below, Tweak::Level(level as u32)));
        }
        Self {
            nodes: vec![Vec::new(); VERIFICATION_MERKLE_DEPTH + 1],
            zeros,
            root_history: Vec::new(),
        }
    }

    /// Append a leaf, returning its index.
    pub fn insert(&mut self, leaf: B256) -> Result<u64, LedgerError> {
        let index = self.nodes[0].len() as u64;
        if index >= 1u64 << VERIFICATION_MERKLE_DEPTH {
            return Err(LedgerError::TreeFull);
        }
        self.nodes[0].push(leaf);

        let mut position = index as usize;
        for level in 0..VERIFICATION_MERKLE_DEPTH {
            let left = self.node(level, position & !1);
            let right = self.node(level, position | 1);
            let parent = accum(left, right, Tweak::Level(level as u32));
            position >>= 1;
            let row = &mut self.nodes[level + 1];
            if position < row.len() {
                row[position] = parent;
            } else {
                row.push(parent);
            }
        }
        self.root_history.push(self.root());
        Ok(index)
    }

    fn node(&self, level: usize, position: usize) -> B256 {
        self.nodes[level]
            .get(position)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    /// Current root; the all-zero-subtree root when empty.
    pub fn root(&self) -> B256 {
        self.node(VERIFICATION_MERKLE_DEPTH, 0)
    }

    /// Check if a root exists in the history.
    pub fn is_known_root(&self, root: B256) -> bool {
        self.root_history.contains(&root)
    }

    /// Path proof of leaf `index` against the current root.
    pub fn path_proof(&self, index: u64) -> Option<PathProof> {
        let leaf = *self.nodes[0].get(index as usize)?;
        let siblings = (0..VERIFICATION_MERKLE_DEPTH)
            .map(|level| self.node(level, ((index as usize) >> level) ^ 1))
            .collect();
        Some(PathProof {
            root: self.root(),
            directions: decode_path(index, VERIFICATION_MERKLE_DEPTH),
            siblings,
            leaf,
        })
    }

    pub fn len(&self) -> u64 {
        self.nodes[0].len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].is_empty()
    }

    pub fn root_history(&self) -> &[B256] {
        &self.root_history
    }
}

impl Default for VerificationTree {
    fn default() -> Self {
        Self::new()
    }
}
