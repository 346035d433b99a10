use alloy_primitives::Address;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};

/// An account's signing/encryption key pair plus its unlock passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKey {
    pub address: Address,
    pub passphrase: String,
    secret: SecretKey,
}

impl AccountKey {
    pub fn new(secret: SecretKey, passphrase: impl Into<String>) -> Self {
        Self {
            address: address_of(&secret.public_key()),
            passphrase: passphrase.into(),
            secret,
        }
    }

    /// Generate a random account.
    pub fn random(passphrase: impl Into<String>) -> Self {
        Self::new(SecretKey::random(&mut rand::thread_rng()), passphrase)
    }

    /// Create from raw secret-key bytes.
    pub fn from_bytes(bytes: &[u8], passphrase: impl Into<String>) -> Result<Self, k256::elliptic_curve::Error> {
        Ok(Self::new(SecretKey::from_slice(bytes)?, passphrase))
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }
}

/// Ethereum address: last 20 bytes of `keccak256(uncompressed_pubkey[1..])`.
pub fn address_of(public_key: &PublicKey) -> Address {
    let encoded = public_key.to_encoded_point(false);
    Address::from_raw_public_key(&encoded.as_bytes()[1..])
}

/// Uncompressed public key without the `0x04` prefix (64 bytes).
pub fn raw_public_key(public_key: &PublicKey) -> Vec<u8> {
    public_key.to_encoded_point(false).as_bytes()[1..].to_vec()
}

/// Parse a public key from SEC1 (33 or 65 bytes) or raw 64-byte form.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, k256::elliptic_curve::Error> {
    if bytes.len() == 64 {
        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(bytes);
        return PublicKey::from_sec1_bytes(&sec1);
    }
    PublicKey::from_sec1_bytes(bytes)
}
