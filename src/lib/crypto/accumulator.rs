//! Domain-separated two-input compression used for protocol commitments and
//! for every Merkle node.
//!
//! `accum(a, b, tweak) = Poseidon(tweak, a_hi, a_lo, b_hi, b_lo)` where each
//! 32-byte input is split into two 128-bit limbs. The tweak is embedded as a
//! signed field element, so commitment hashing (`-1`) and Merkle level `l`
//! never share a domain.

use alloy_primitives::B256;
use ark_bn254::Fr;

use crate::crypto::poseidon::{b256_to_limbs, poseidon_fields};

/// Width in bytes of every accumulator input and output.
pub const HASH_BYTES: usize = 32;

/// Domain selector for [`accum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tweak {
    /// Protocol-level commitments (`commit_root`, `verification`, ...).
    Commitment,
    /// Merkle compression at the given level (0 = just above the leaves).
    Level(u32),
}

impl Tweak {
    /// Integer form of the tweak: `-1` for commitments, `l` for level `l`.
    pub fn as_i64(self) -> i64 {
        match self {
            Tweak::Commitment => -1,
            Tweak::Level(level) => i64::from(level),
        }
    }

    fn to_field(self) -> Fr {
        Fr::from(self.as_i64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccumulatorError {
    #[error("accumulator input {position} is {length} bytes, expected {HASH_BYTES}")]
    InvalidInputLength { position: usize, length: usize },

    #[error("accumulation needs at least two inputs, got {0}")]
    TooFewInputs(usize),
}

/// Compress two 32-byte words under `tweak`.
pub fn accum(a: B256, b: B256, tweak: Tweak) -> B256 {
    let (a_hi, a_lo) = b256_to_limbs(a);
    let (b_hi, b_lo) = b256_to_limbs(b);
    poseidon_fields(&[tweak.to_field(), a_hi, a_lo, b_hi, b_lo])
}

/// Byte-slice form of [`accum`]. Inputs are never padded or truncated here.
pub fn accum_bytes(a: &[u8], b: &[u8], tweak: Tweak) -> Result<B256, AccumulatorError> {
    let a = to_word(a, 0)?;
    let b = to_word(b, 1)?;
    Ok(accum(a, b, tweak))
}

/// Left fold: `accum(accum(accum(x0, x1), x2), x3) ...`.
pub fn accumulate(inputs: &[B256], tweak: Tweak) -> Result<B256, AccumulatorError> {
    match inputs {
        [first, rest @ ..] if !rest.is_empty() => {
            Ok(rest.iter().fold(*first, |acc, next| accum(acc, *next, tweak)))
        }
        _ => Err(AccumulatorError::TooFewInputs(inputs.len())),
    }
}

/// Left fold over raw byte slices, checking every input length first.
pub fn accumulate_bytes(inputs: &[&[u8]], tweak: Tweak) -> Result<B256, AccumulatorError> {
    let words = inputs
        .iter()
        .enumerate()
        .map(|(position, bytes)| to_word(bytes, position))
        .collect::<Result<Vec<_>, _>>()?;
    accumulate(&words, tweak)
}

/// Commitment-domain fold of `first` with every word in `rest`.
pub fn commit(first: B256, rest: &[B256]) -> B256 {
    rest.iter()
        .fold(first, |acc, next| accum(acc, *next, Tweak::Commitment))
}

fn to_word(bytes: &[u8], position: usize) -> Result<B256, AccumulatorError> {
    if bytes.len() != HASH_BYTES {
        return Err(AccumulatorError::InvalidInputLength {
            position,
            length: bytes.len(),
        });
    }
    Ok(B256::from_slice(bytes))
}
