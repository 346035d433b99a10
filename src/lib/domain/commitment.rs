//! Protocol commitments, all in the commitment domain of the accumulator.

use alloy_primitives::{Address, B256};

use crate::crypto::accumulator::commit;
use crate::domain::encoding::{pad_address, pad_int};

/// `commit_root = accum(addr_root, passphrase, threshold, nonce)`.
pub fn commit_root(addr_root: B256, passphrase: B256, threshold: B256, nonce: B256) -> B256 {
    commit(addr_root, &[passphrase, threshold, nonce])
}

/// `commit_root_t = accum(addr_root, passphrase, threshold, pad_address(new_address))`.
///
/// `address_new` is already padded so circuits can pass their public word through.
pub fn commit_root_t(addr_root: B256, passphrase: B256, threshold: B256, address_new: B256) -> B256 {
    commit(addr_root, &[passphrase, threshold, address_new])
}

/// `accum(pad_int(pre_transfer_index), nonce1)`, taking the index pre-encoded.
pub fn pre_transfer_commitment_word(pre_transfer_index: B256, nonce1: B256) -> B256 {
    commit(pre_transfer_index, &[nonce1])
}

pub fn pre_transfer_commitment(pre_transfer_index: u64, nonce1: B256) -> B256 {
    pre_transfer_commitment_word(pad_int(pre_transfer_index), nonce1)
}

/// `accum(pre_transfer_commitment, friend_word, nonce2)`.
pub fn verification_word(pre_transfer_commitment: B256, friend_word: B256, nonce2: B256) -> B256 {
    commit(pre_transfer_commitment, &[friend_word, nonce2])
}

/// A friend's verification hash for a pre-transfer commitment.
pub fn verification(pre_transfer_commitment: B256, friend: Address, nonce2: B256) -> B256 {
    verification_word(pre_transfer_commitment, pad_address(friend), nonce2)
}
