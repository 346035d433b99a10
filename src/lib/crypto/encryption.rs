use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use k256::ecdh::EphemeralSecret;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};

/// Domain separator for HKDF key derivation.
const HKDF_INFO: &[u8] = b"social-recovery-ecies-v1";

/// Compressed SEC1 ephemeral key length.
pub const EPHEMERAL_KEY_LEN: usize = 33;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Sealed length for a plaintext of `plaintext_len` bytes.
pub const fn sealed_len(plaintext_len: usize) -> usize {
    EPHEMERAL_KEY_LEN + plaintext_len + TAG_LEN
}

/// Errors that can occur while opening a sealed payload.
///
/// Trying someone else's ciphertext is routine in this protocol, so callers
/// scanning a batch treat every variant as "not for me".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecryptFailure {
    #[error("Ciphertext too short")]
    Truncated,
    #[error("Invalid ephemeral public key")]
    InvalidEphemeralKey,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
    #[error("Cipher initialization failed")]
    CipherInitFailed,
    #[error("Decryption failed (wrong key or corrupted data)")]
    DecryptionFailed,
    #[error("Decrypted payload is malformed")]
    MalformedPayload,
}

/// ECIES seal: `ephemeral_pubkey (33) || ChaCha20-Poly1305(plaintext)`.
///
/// Scheme:
/// 1. Generate ephemeral keypair
/// 2. ECDH: shared_secret = ephemeral_secret * recipient_pubkey
/// 3. HKDF: derive symmetric key from shared_secret
/// 4. ChaCha20-Poly1305: encrypt with derived key
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Vec<u8> {
    let ephemeral_secret = EphemeralSecret::random(&mut rand::thread_rng());
    let ephemeral_pubkey = ephemeral_secret.public_key();
    let shared_secret = ephemeral_secret.diffie_hellman(recipient);

    let (key, nonce_bytes) = derive_key_and_nonce(shared_secret.raw_secret_bytes().as_slice())
        .expect("HKDF expand should not fail with 32 byte output");
    let cipher =
        ChaCha20Poly1305::new_from_slice(&key).expect("ChaCha20Poly1305 key should be valid");
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .expect("Encryption should not fail");

    let mut sealed = Vec::with_capacity(sealed_len(plaintext.len()));
    sealed.extend_from_slice(ephemeral_pubkey.to_encoded_point(true).as_bytes());
    sealed.extend_from_slice(&ciphertext);
    sealed
}

/// Open a payload produced by [`seal`] with the recipient's secret key.
pub fn open(secret: &SecretKey, sealed: &[u8]) -> Result<Vec<u8>, DecryptFailure> {
    if sealed.len() < EPHEMERAL_KEY_LEN + TAG_LEN {
        return Err(DecryptFailure::Truncated);
    }
    let (ephemeral, ciphertext) = sealed.split_at(EPHEMERAL_KEY_LEN);

    let ephemeral_pubkey =
        PublicKey::from_sec1_bytes(ephemeral).map_err(|_| DecryptFailure::InvalidEphemeralKey)?;
    let shared_secret =
        k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephemeral_pubkey.as_affine());

    let (key, nonce_bytes) = derive_key_and_nonce(shared_secret.raw_secret_bytes().as_slice())
        .ok_or(DecryptFailure::KeyDerivationFailed)?;
    let cipher =
        ChaCha20Poly1305::new_from_slice(&key).map_err(|_| DecryptFailure::CipherInitFailed)?;
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext)
        .map_err(|_| DecryptFailure::DecryptionFailed)
}

// The ephemeral key is fresh per message, so a nonce derived from the shared
// secret is never reused under the same key.
fn derive_key_and_nonce(shared: &[u8]) -> Option<([u8; 32], [u8; 12])> {
    let hkdf = Hkdf::<Sha256>::new(None, shared);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key).ok()?;

    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&Sha256::digest(shared)[..12]);
    Some((key, nonce))
}
