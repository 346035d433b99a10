use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::crypto::accumulator::{accum, Tweak};
use crate::domain::encoding::decode_path;
use crate::domain::friends::ExtendedFriendList;

/// Inclusion proof shared by the friend tree and the ledger's verification tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathProof {
    pub root: B256,
    /// Bit `i` is 1 when the running node is the right child at level `i`.
    pub directions: Vec<u8>,
    /// Complementary node at each level, leaf level first.
    pub siblings: Vec<B256>,
    pub leaf: B256,
}

impl PathProof {
    /// Root obtained by replaying the path from `leaf`.
    pub fn replay(&self) -> B256 {
        replay_path(self.leaf, &self.directions, &self.siblings)
    }

    /// True when the replayed root equals `root`.
    pub fn verify(&self) -> bool {
        self.directions.len() == self.siblings.len() && self.replay() == self.root
    }
}

/// `current = dir == 0 ? accum(current, sibling, i) : accum(sibling, current, i)` per level.
pub fn replay_path(leaf: B256, directions: &[u8], siblings: &[B256]) -> B256 {
    directions
        .iter()
        .zip(siblings)
        .enumerate()
        .fold(leaf, |current, (level, (&direction, &sibling))| {
            let tweak = Tweak::Level(level as u32);
            if direction == 0 {
                accum(current, sibling, tweak)
            } else {
                accum(sibling, current, tweak)
            }
        })
}

/// Complete binary tree of depth `log2(slots)` over an extended friend list.
///
/// `levels[0]` holds the leaves, `levels[depth]` holds the root.
#[derive(Debug, Clone)]
pub struct FriendMerkleTree {
    levels: Vec<Vec<B256>>,
}

impl FriendMerkleTree {
    pub fn build(extended: &ExtendedFriendList) -> Self {
        Self::from_leaves(extended.padded())
    }

    /// Build from raw 32-byte leaves, padded with zero words up to a power of two.
    pub fn from_leaves(mut leaves: Vec<B256>) -> Self {
        leaves.resize(leaves.len().max(1).next_power_of_two(), B256::ZERO);
        let mut levels = vec![leaves];
        let mut level = 0u32;
        while levels[levels.len() - 1].len() > 1 {
            let next = levels[levels.len() - 1]
                .chunks(2)
                .map(|pair| accum(pair[0], pair[1], Tweak::Level(level)))
                .collect();
            levels.push(next);
            level += 1;
        }
        Self { levels }
    }

    pub fn root(&self) -> B256 {
        self.levels[self.levels.len() - 1][0]
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn leaf(&self, slot: usize) -> Option<B256> {
        self.levels[0].get(slot).copied()
    }

    /// Path proof for `slot`, or `None` if the slot is out of range.
    pub fn path_proof(&self, slot: usize) -> Option<PathProof> {
        let leaf = self.leaf(slot)?;
        let directions = decode_path(slot as u64, self.depth());
        let siblings = (0..self.depth())
            .map(|level| self.levels[level][(slot >> level) ^ 1])
            .collect();
        Some(PathProof {
            root: self.root(),
            directions,
            siblings,
            leaf,
        })
    }
}
