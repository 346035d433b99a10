use std::collections::HashMap;
use std::path::Path;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::keys::{address_of, parse_public_key, raw_public_key, AccountKey};
use crate::ports::keystore::{KeyStore, KeyStoreError};

/// One account as stored on disk; keys are hex, with or without `0x`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyEntry {
    address: Address,
    passphrase: String,
    public_key: String,
    private_key: String,
}

/// Key directory backed by a JSON array of account entries.
#[derive(Debug, Default)]
pub struct JsonKeyStore {
    accounts: HashMap<Address, AccountKey>,
    /// Addresses in file order.
    order: Vec<Address>,
}

impl JsonKeyStore {
    /// Read and check every entry of `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let store = Self::from_json(&content)?;
        info!(path = %path.as_ref().display(), accounts = store.order.len(), "key store loaded");
        Ok(store)
    }

    pub fn from_json(content: &str) -> Result<Self, KeyStoreError> {
        let entries: Vec<KeyEntry> = serde_json::from_str(content)?;
        let mut store = Self::default();
        for entry in entries {
            store.insert(decode_entry(&entry)?);
        }
        Ok(store)
    }

    /// Generate `count` fresh accounts, each with a random passphrase.
    pub fn generate(count: usize) -> Self {
        let mut store = Self::default();
        for _ in 0..count {
            let passphrase = hex::encode(rand::random::<[u8; 8]>());
            store.insert(AccountKey::random(passphrase));
        }
        store
    }

    pub fn insert(&mut self, account: AccountKey) {
        if self.accounts.insert(account.address, account.clone()).is_none() {
            self.order.push(account.address);
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyStoreError> {
        let entries: Vec<KeyEntry> = self
            .accounts()
            .map(|account| KeyEntry {
                address: account.address,
                passphrase: account.passphrase.clone(),
                public_key: hex::encode(raw_public_key(&account.public_key())),
                private_key: hex::encode(account.secret_key().to_bytes()),
            })
            .collect();
        std::fs::write(path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    /// Accounts in file order.
    pub fn accounts(&self) -> impl Iterator<Item = &AccountKey> + '_ {
        self.order.iter().filter_map(|address| self.accounts.get(address))
    }

    /// Account at `position` in file order.
    pub fn nth(&self, position: usize) -> Option<&AccountKey> {
        self.order.get(position).and_then(|address| self.accounts.get(address))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl KeyStore for JsonKeyStore {
    fn account(&self, address: Address) -> Result<&AccountKey, KeyStoreError> {
        self.accounts
            .get(&address)
            .ok_or(KeyStoreError::UnknownAccount(address))
    }
}

fn decode_entry(entry: &KeyEntry) -> Result<AccountKey, KeyStoreError> {
    let invalid = |reason: String| KeyStoreError::InvalidKey {
        address: entry.address.to_string(),
        reason,
    };
    let secret = hex::decode(entry.private_key.trim_start_matches("0x"))
        .map_err(|e| invalid(format!("private key: {e}")))?;
    let account = AccountKey::from_bytes(&secret, entry.passphrase.clone())
        .map_err(|e| invalid(format!("private key: {e}")))?;
    if account.address != entry.address {
        return Err(KeyStoreError::AddressMismatch {
            listed: entry.address,
            derived: account.address,
        });
    }

    let public = hex::decode(entry.public_key.trim_start_matches("0x"))
        .map_err(|e| invalid(format!("public key: {e}")))?;
    let public = parse_public_key(&public).map_err(|e| invalid(format!("public key: {e}")))?;
    if address_of(&public) != entry.address {
        return Err(invalid("public key does not belong to address".into()));
    }
    Ok(account)
}
