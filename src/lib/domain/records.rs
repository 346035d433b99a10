//! Records as stored on the ledger, one struct per record type.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::domain::encoding::bits_to_bytes;

/// `commit_root = accum(addr_root, passphrase, threshold, nonce)`; immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Address whose key may later be lost.
    pub sender: Address,
    pub commit_root: B256,
    /// Maximum amount a successful transfer may move.
    pub limit: U256,
    pub nonce: B256,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreTransferRecord {
    /// The new address claiming the committed account.
    pub sender: Address,
    pub commit_index: u64,
    pub verified: VerifiedBitmap,
    pub block_num: u64,
    /// `accum(addr_root, passphrase, threshold, pad_address(new_address))`.
    pub commit_root_t: B256,
    pub transferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// The verifying friend.
    pub sender: Address,
    /// `accum(pre_transfer_commitment, pad_address(friend), nonce2)`.
    pub verification: B256,
    /// `accum(pad_int(pre_transfer_index), nonce1)`.
    pub pre_transfer_commitment: B256,
    pub nonce2: B256,
}

/// One bit per extended-list slot; set only by accepted preparations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedBitmap(Vec<bool>);

impl VerifiedBitmap {
    pub fn new(len: usize) -> Self {
        Self(vec![false; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, slot: usize) -> bool {
        self.0.get(slot).copied().unwrap_or(false)
    }

    /// Set `slot`; returns false if it was already set or out of range.
    pub fn mark(&mut self, slot: usize) -> bool {
        match self.0.get_mut(slot) {
            Some(bit) if !*bit => {
                *bit = true;
                true
            }
            _ => false,
        }
    }

    pub fn bits(&self) -> &[bool] {
        &self.0
    }

    /// Slot indexes whose bit is set, ascending.
    pub fn verified_slots(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, bit)| **bit)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|bit| **bit).count()
    }

    /// MSB-first packed form.
    pub fn to_bytes(&self) -> Vec<u8> {
        bits_to_bytes(&self.0)
    }
}
