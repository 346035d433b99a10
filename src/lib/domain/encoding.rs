//! Fixed-width field framing shared by commitments, Merkle leaves and
//! prover inputs. Every field is exactly 32 bytes.

use alloy_primitives::{Address, B256};
use rand::RngCore;

use super::params::NONCE_BYTES;
use super::validation::ValidationError;

/// Address bytes right-padded with zeros to 32 bytes.
pub fn pad_address(address: Address) -> B256 {
    let mut padded = [0u8; 32];
    padded[..20].copy_from_slice(address.as_slice());
    B256::from(padded)
}

/// Inverse of [`pad_address`]; `None` if the padding bytes are non-zero.
pub fn unpad_address(word: B256) -> Option<Address> {
    if word[20..].iter().any(|&b| b != 0) {
        return None;
    }
    Some(Address::from_slice(&word[..20]))
}

/// UTF-8 bytes right-padded with zeros to 32 bytes.
pub fn pad_str(value: &str) -> Result<B256, ValidationError> {
    let bytes = value.as_bytes();
    if bytes.len() > 32 {
        return Err(ValidationError::PassphraseTooLong(bytes.len()));
    }
    let mut padded = [0u8; 32];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(B256::from(padded))
}

/// 32-byte little-endian integer.
pub fn pad_int(value: u64) -> B256 {
    let mut padded = [0u8; 32];
    padded[..8].copy_from_slice(&value.to_le_bytes());
    B256::from(padded)
}

/// Inverse of [`pad_int`]; `None` if the value does not fit in a `u64`.
pub fn unpad_int(word: B256) -> Option<u64> {
    if word[8..].iter().any(|&b| b != 0) {
        return None;
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[..8]);
    Some(u64::from_le_bytes(low))
}

/// Fresh nonce: `NONCE_BYTES - 1` random bytes followed by a zero byte.
pub fn random_nonce() -> B256 {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes[..NONCE_BYTES - 1]);
    B256::from(bytes)
}

/// Pack bits MSB-first into bytes; a trailing partial byte is zero-filled.
pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, &bit)| byte | (u8::from(bit) << (7 - i)))
        })
        .collect()
}

/// Direction bits for a leaf position: bit `i` is `(index >> i) & 1`.
pub fn decode_path(index: u64, path_len: usize) -> Vec<u8> {
    (0..path_len).map(|i| ((index >> i) & 1) as u8).collect()
}
