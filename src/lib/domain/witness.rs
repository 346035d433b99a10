use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::ports::prover::Circuit;

/// Public inputs for the pre-transfer circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreTransferPublicInputs {
    pub commit_root: B256,
    pub commit_root_t: B256,
    /// `pad_address(new_address)`
    pub address_new: B256,
    pub nonce: B256,
}

/// Witness (public + private inputs) for the pre-transfer circuit.
///
/// Proves knowledge of an extended friend list, passphrase and threshold that
/// open both `commit_root` and `commit_root_t`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreTransferWitness {
    // === Public Inputs ===
    pub public: PreTransferPublicInputs,

    // === Private Inputs ===
    /// Padded extended friend list, one word per slot
    pub addresses: Vec<B256>,
    pub passphrase: B256,
    pub threshold: B256,
}

/// Public inputs for the preparation circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationPublicInputs {
    pub commit_root: B256,
    /// Direction bits of the friend's slot, leaf level first
    pub friend_directions: Vec<u8>,
    pub nonce: B256,
    /// `pad_int(pre_transfer_index)`
    pub pre_transfer_index: B256,
    pub verification_root: B256,
}

/// Witness (public + private inputs) for the preparation circuit.
///
/// For a non-null friend: the slot opens `commit_root` and the friend's
/// verification hash chain is included under `verification_root`. For a null
/// slot only the commit-root opening is enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationWitness {
    // === Public Inputs ===
    pub public: PreparationPublicInputs,

    // === Private Inputs ===
    pub friend_address: B256,
    pub friend_path: Vec<B256>,
    pub passphrase: B256,
    pub threshold: B256,
    pub verification: B256,
    pub verification_nonce1: B256,
    pub verification_nonce2: B256,
    pub verification_path: Vec<B256>,
    pub verification_directions: Vec<u8>,
}

/// Public inputs for the transfer circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPublicInputs {
    pub commit_root: B256,
    /// The pre-transfer's verified bitmap
    pub vlist: Vec<bool>,
}

/// Witness (public + private inputs) for the transfer circuit.
///
/// Proves that at least `threshold` set bits of `vlist` fall on non-null slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferWitness {
    // === Public Inputs ===
    pub public: TransferPublicInputs,

    // === Private Inputs ===
    pub addresses: Vec<B256>,
    pub passphrase: B256,
    pub threshold: B256,
    pub nonce: B256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicInputs {
    PreTransfer(PreTransferPublicInputs),
    Preparation(PreparationPublicInputs),
    Transfer(TransferPublicInputs),
}

impl PublicInputs {
    pub fn circuit(&self) -> Circuit {
        match self {
            PublicInputs::PreTransfer(_) => Circuit::PreTransfer,
            PublicInputs::Preparation(_) => Circuit::Preparation,
            PublicInputs::Transfer(_) => Circuit::Transfer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Witness {
    PreTransfer(PreTransferWitness),
    Preparation(PreparationWitness),
    Transfer(TransferWitness),
}

impl Witness {
    pub fn circuit(&self) -> Circuit {
        match self {
            Witness::PreTransfer(_) => Circuit::PreTransfer,
            Witness::Preparation(_) => Circuit::Preparation,
            Witness::Transfer(_) => Circuit::Transfer,
        }
    }

    pub fn public_inputs(&self) -> PublicInputs {
        match self {
            Witness::PreTransfer(w) => PublicInputs::PreTransfer(w.public.clone()),
            Witness::Preparation(w) => PublicInputs::Preparation(w.public.clone()),
            Witness::Transfer(w) => PublicInputs::Transfer(w.public.clone()),
        }
    }
}
