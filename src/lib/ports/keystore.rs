use alloy_primitives::Address;
use k256::PublicKey;

use crate::domain::keys::AccountKey;

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid key for {address}: {reason}")]
    InvalidKey { address: String, reason: String },

    #[error("address {listed} does not match key-derived address {derived}")]
    AddressMismatch { listed: Address, derived: Address },

    #[error("unknown account {0}")]
    UnknownAccount(Address),
}

/// Read-only account directory, loaded once at startup.
pub trait KeyStore: Send + Sync {
    fn account(&self, address: Address) -> Result<&AccountKey, KeyStoreError>;

    fn public_key(&self, address: Address) -> Result<PublicKey, KeyStoreError> {
        self.account(address).map(AccountKey::public_key)
    }
}
