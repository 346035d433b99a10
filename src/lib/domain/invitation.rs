//! Invitation and verification-receipt payloads.
//!
//! Invitation plaintext: `pad_address(claimed) (32) || note_len (1) || note || random fill`
//! where the note area is always `max_note_len` bytes, so every ciphertext for
//! a given parameter set has the same length.
//!
//! Receipt plaintext: `pad_int(pre_transfer_index) (32) || nonce1 (32)`.

use alloy_primitives::{Address, B256};
use k256::{PublicKey, SecretKey};
use rand::{Rng, RngCore};
use tracing::debug;

use crate::crypto::encryption::{open, seal, sealed_len, DecryptFailure};
use crate::domain::encoding::{pad_address, pad_int, unpad_address, unpad_int};
use crate::domain::params::ProtocolParams;
use crate::domain::validation::ValidationError;

const ADDRESS_FIELD: usize = 32;
const RECEIPT_PLAINTEXT_LEN: usize = 64;

/// Contents of an invitation after successful decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    /// Address whose key was lost.
    pub claimed_address: Address,
    pub note: String,
}

/// Contents of a verification receipt after successful decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationReceipt {
    pub pre_transfer_index: u64,
    pub nonce1: B256,
}

/// Ciphertext length of every invitation under `params`.
pub fn invitation_len(params: &ProtocolParams) -> usize {
    sealed_len(ADDRESS_FIELD + 1 + params.max_note_len)
}

/// Ciphertext length of every verification receipt.
pub fn receipt_len() -> usize {
    sealed_len(RECEIPT_PLAINTEXT_LEN)
}

pub fn encrypt_invitation(
    recipient: &PublicKey,
    claimed_address: Address,
    note: &str,
    params: &ProtocolParams,
) -> Result<Vec<u8>, ValidationError> {
    let note_bytes = note.as_bytes();
    if note_bytes.len() > params.max_note_len {
        return Err(ValidationError::NoteTooLong {
            len: note_bytes.len(),
            max: params.max_note_len,
        });
    }

    Ok(seal_invitation(recipient, claimed_address, note_bytes, params))
}

fn seal_invitation(
    recipient: &PublicKey,
    claimed_address: Address,
    note: &[u8],
    params: &ProtocolParams,
) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(ADDRESS_FIELD + 1 + params.max_note_len);
    plaintext.extend_from_slice(pad_address(claimed_address).as_slice());
    plaintext.push(note.len() as u8);
    plaintext.extend_from_slice(note);

    let mut fill = vec![0u8; params.max_note_len - note.len()];
    rand::thread_rng().fill_bytes(&mut fill);
    plaintext.extend_from_slice(&fill);

    seal(recipient, &plaintext)
}

pub fn decrypt_invitation(
    secret: &SecretKey,
    ciphertext: &[u8],
    params: &ProtocolParams,
) -> Result<Invitation, DecryptFailure> {
    let plaintext = open(secret, ciphertext)?;
    if plaintext.len() != ADDRESS_FIELD + 1 + params.max_note_len {
        return Err(DecryptFailure::MalformedPayload);
    }

    let claimed_address = unpad_address(B256::from_slice(&plaintext[..ADDRESS_FIELD]))
        .ok_or(DecryptFailure::MalformedPayload)?;
    let note_len = plaintext[ADDRESS_FIELD] as usize;
    if note_len > params.max_note_len {
        return Err(DecryptFailure::MalformedPayload);
    }
    let start = ADDRESS_FIELD + 1;
    let note = std::str::from_utf8(&plaintext[start..start + note_len])
        .map_err(|_| DecryptFailure::MalformedPayload)?
        .to_string();

    Ok(Invitation {
        claimed_address,
        note,
    })
}

/// Filler for unused invitation positions.
///
/// A genuine invitation sealed to a throwaway key, carrying a random address
/// and a random-length note, so it is structurally identical to a real one
/// and nobody can open it.
pub fn filler_invitation(params: &ProtocolParams) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let throwaway = SecretKey::random(&mut rng).public_key();
    let mut note = vec![0u8; rng.gen_range(0..=params.max_note_len)];
    rng.fill_bytes(&mut note);
    seal_invitation(&throwaway, Address::random(), &note, params)
}

/// Try every invitation against one key; ciphertexts for other recipients are skipped.
pub fn scan_invitations<'a, I>(
    secret: &SecretKey,
    invitations: I,
    params: &ProtocolParams,
) -> Vec<Invitation>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    invitations
        .into_iter()
        .enumerate()
        .filter_map(|(position, ciphertext)| {
            match decrypt_invitation(secret, ciphertext, params) {
                Ok(invitation) => Some(invitation),
                Err(failure) => {
                    debug!(position, %failure, "invitation not addressed to this key");
                    None
                }
            }
        })
        .collect()
}

pub fn encrypt_verification_receipt(
    recipient: &PublicKey,
    pre_transfer_index: u64,
    nonce1: B256,
) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(RECEIPT_PLAINTEXT_LEN);
    plaintext.extend_from_slice(pad_int(pre_transfer_index).as_slice());
    plaintext.extend_from_slice(nonce1.as_slice());
    seal(recipient, &plaintext)
}

pub fn decrypt_verification_receipt(
    secret: &SecretKey,
    ciphertext: &[u8],
) -> Result<VerificationReceipt, DecryptFailure> {
    let plaintext = open(secret, ciphertext)?;
    if plaintext.len() != RECEIPT_PLAINTEXT_LEN {
        return Err(DecryptFailure::MalformedPayload);
    }
    let pre_transfer_index = unpad_int(B256::from_slice(&plaintext[..32]))
        .ok_or(DecryptFailure::MalformedPayload)?;
    Ok(VerificationReceipt {
        pre_transfer_index,
        nonce1: B256::from_slice(&plaintext[32..]),
    })
}
