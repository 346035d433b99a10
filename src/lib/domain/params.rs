use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use super::validation::ValidationError;

/// Default number of slots in an extended friend list.
pub const DEFAULT_MAX_FRIENDS_LEN: usize = 16;

/// Depth of the ledger-side verification tree.
pub const VERIFICATION_MERKLE_DEPTH: usize = 32;

/// Nonce width. The last byte is always zero.
pub const NONCE_BYTES: usize = 32;

/// Default upper bound on an invitation note (bytes of UTF-8).
pub const DEFAULT_MAX_NOTE_LEN: usize = 128;

/// Fixed proof size returned by every circuit.
pub const PROOF_BUF_LEN: usize = 192;

/// Reserved identifier filling unused slots of an extended friend list.
pub const NULL_ADDRESS: Address = Address::ZERO;

/// Wire-contract sizes that can vary between deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Slots in an extended friend list; a power of two.
    #[serde(default = "default_max_friends_len")]
    pub max_friends_len: usize,
    #[serde(default = "default_max_note_len")]
    pub max_note_len: usize,
}

fn default_max_friends_len() -> usize {
    DEFAULT_MAX_FRIENDS_LEN
}

fn default_max_note_len() -> usize {
    DEFAULT_MAX_NOTE_LEN
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            max_friends_len: DEFAULT_MAX_FRIENDS_LEN,
            max_note_len: DEFAULT_MAX_NOTE_LEN,
        }
    }
}

impl ProtocolParams {
    pub fn new(max_friends_len: usize, max_note_len: usize) -> Result<Self, ValidationError> {
        let params = Self {
            max_friends_len,
            max_note_len,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(2..=256).contains(&self.max_friends_len) || !self.max_friends_len.is_power_of_two() {
            return Err(ValidationError::InvalidParams(format!(
                "max_friends_len must be a power of two in [2, 256], got {}",
                self.max_friends_len
            )));
        }
        // The note length travels in a single byte.
        if self.max_note_len > u8::MAX as usize {
            return Err(ValidationError::InvalidParams(format!(
                "max_note_len must be at most 255, got {}",
                self.max_note_len
            )));
        }
        Ok(())
    }

    /// `log2(max_friends_len)`.
    pub fn friends_merkle_depth(&self) -> usize {
        self.max_friends_len.trailing_zeros() as usize
    }
}
