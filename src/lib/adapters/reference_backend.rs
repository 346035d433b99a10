//! Native evaluation of the three recovery circuits.
//!
//! The backend recomputes every relation from the flat inputs and, when all
//! constraints hold, emits a proof bound to the public inputs:
//! `HKDF-SHA256(salt = setup_seed, ikm = public_inputs).expand(circuit, PROOF_BUF_LEN)`.
//! Verification recomputes the same bytes. Proofs are sound against callers
//! that do not hold `setup_seed`; they are not zero-knowledge.

use alloy_primitives::B256;
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::debug;

use crate::adapters::proof_adapter::{decode_public, decode_witness};
use crate::domain::commitment::{
    commit_root, commit_root_t, pre_transfer_commitment_word, verification_word,
};
use crate::domain::encoding::unpad_int;
use crate::domain::merkle::{replay_path, FriendMerkleTree};
use crate::domain::params::{ProtocolParams, PROOF_BUF_LEN};
use crate::domain::witness::{PreTransferWitness, PreparationWitness, TransferWitness, Witness};
use crate::ports::prover::{Circuit, ProofBackend, ProverError};

/// In-process proving backend that checks constraints natively.
#[derive(Debug, Clone)]
pub struct ReferenceBackend {
    params: ProtocolParams,
    setup_seed: B256,
}

impl ReferenceBackend {
    pub fn new(params: ProtocolParams, setup_seed: B256) -> Self {
        Self { params, setup_seed }
    }

    fn seal(&self, circuit: Circuit, public_inputs: &[u8]) -> Result<Vec<u8>, ProverError> {
        let hk = Hkdf::<Sha256>::new(Some(self.setup_seed.as_slice()), public_inputs);
        let mut proof = vec![0u8; PROOF_BUF_LEN];
        hk.expand(circuit.label().as_bytes(), &mut proof)
            .map_err(|e| ProverError::Backend(format!("proof expansion failed: {e}")))?;
        Ok(proof)
    }
}

impl ProofBackend for ReferenceBackend {
    async fn prove(
        &self,
        circuit: Circuit,
        public_inputs: &[u8],
        private_inputs: &[u8],
    ) -> Result<Vec<u8>, ProverError> {
        let public = decode_public(circuit, public_inputs, &self.params)?;
        let witness = decode_witness(public, private_inputs, &self.params)?;
        match &witness {
            Witness::PreTransfer(w) => check_pre_transfer(w),
            Witness::Preparation(w) => check_preparation(w),
            Witness::Transfer(w) => check_transfer(w),
        }
        .map_err(|reason| ProverError::ConstraintViolation { circuit, reason })?;

        debug!(%circuit, "constraints satisfied");
        self.seal(circuit, public_inputs)
    }

    async fn verify(
        &self,
        circuit: Circuit,
        public_inputs: &[u8],
        proof: &[u8],
    ) -> Result<bool, ProverError> {
        decode_public(circuit, public_inputs, &self.params)?;
        if proof.len() != PROOF_BUF_LEN {
            return Ok(false);
        }
        Ok(self.seal(circuit, public_inputs)? == proof)
    }
}

// ========== Relations ==========

fn check_pre_transfer(w: &PreTransferWitness) -> Result<(), String> {
    let addr_root = FriendMerkleTree::from_leaves(w.addresses.clone()).root();
    if commit_root(addr_root, w.passphrase, w.threshold, w.public.nonce) != w.public.commit_root {
        return Err("friend list does not open commit_root".into());
    }
    if commit_root_t(addr_root, w.passphrase, w.threshold, w.public.address_new)
        != w.public.commit_root_t
    {
        return Err("friend list does not open commit_root_t".into());
    }
    Ok(())
}

fn check_preparation(w: &PreparationWitness) -> Result<(), String> {
    let addr_root = replay_path(w.friend_address, &w.public.friend_directions, &w.friend_path);
    if commit_root(addr_root, w.passphrase, w.threshold, w.public.nonce) != w.public.commit_root {
        return Err("friend slot does not open commit_root".into());
    }

    // Null slots only need the commit-root opening.
    if w.friend_address == B256::ZERO {
        return Ok(());
    }

    let ptc = pre_transfer_commitment_word(w.public.pre_transfer_index, w.verification_nonce1);
    if verification_word(ptc, w.friend_address, w.verification_nonce2) != w.verification {
        return Err("verification does not match pre-transfer and friend".into());
    }
    let root = replay_path(w.verification, &w.verification_directions, &w.verification_path);
    if root != w.public.verification_root {
        return Err("verification not included under verification_root".into());
    }
    Ok(())
}

fn check_transfer(w: &TransferWitness) -> Result<(), String> {
    let addr_root = FriendMerkleTree::from_leaves(w.addresses.clone()).root();
    if commit_root(addr_root, w.passphrase, w.threshold, w.nonce) != w.public.commit_root {
        return Err("friend list does not open commit_root".into());
    }

    let threshold = decode_threshold(w.threshold)?;
    let verified = w
        .public
        .vlist
        .iter()
        .zip(&w.addresses)
        .filter(|(bit, addr)| **bit && **addr != B256::ZERO)
        .count() as u64;
    if verified < threshold {
        return Err(format!("{verified} verified friends, threshold is {threshold}"));
    }
    Ok(())
}

/// Threshold word is `pad_int(threshold)`; wider values cannot be met.
fn decode_threshold(word: B256) -> Result<u64, String> {
    unpad_int(word).ok_or_else(|| "threshold out of range".to_string())
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;

    use super::*;
    use crate::adapters::proof_adapter::{encode_private, encode_public, ProofAdapter};
    use crate::domain::encoding::{pad_address, pad_int, pad_str};
    use crate::domain::friends::extend_friends;
    use crate::domain::witness::{PreTransferPublicInputs, TransferPublicInputs};

    struct Fixture {
        params: ProtocolParams,
        addresses: Vec<B256>,
        passphrase: B256,
        threshold: B256,
        nonce: B256,
        commit_root: B256,
    }

    fn fixture() -> Fixture {
        let params = ProtocolParams::new(8, 64).unwrap();
        let friends: Vec<Address> = (1..=3).map(Address::repeat_byte).collect();
        let passphrase = pad_str("correct horse").unwrap();
        let threshold = pad_int(2);
        let nonce = B256::repeat_byte(0x11);
        let extended = extend_friends(&friends, passphrase, threshold, nonce, &params).unwrap();
        let addresses = extended.padded();
        let root = FriendMerkleTree::from_leaves(addresses.clone()).root();
        Fixture {
            params,
            addresses,
            passphrase,
            threshold,
            nonce,
            commit_root: commit_root(root, passphrase, threshold, nonce),
        }
    }

    fn transfer_witness(fx: &Fixture, vlist: Vec<bool>) -> Witness {
        Witness::Transfer(TransferWitness {
            public: TransferPublicInputs {
                commit_root: fx.commit_root,
                vlist,
            },
            addresses: fx.addresses.clone(),
            passphrase: fx.passphrase,
            threshold: fx.threshold,
            nonce: fx.nonce,
        })
    }

    fn friend_bits(fx: &Fixture, count: usize) -> Vec<bool> {
        let mut remaining = count;
        fx.addresses
            .iter()
            .map(|addr| {
                let set = *addr != B256::ZERO && remaining > 0;
                if set {
                    remaining -= 1;
                }
                set
            })
            .collect()
    }

    #[tokio::test]
    async fn test_transfer_meets_threshold() {
        let fx = fixture();
        let adapter = ProofAdapter::new(ReferenceBackend::new(fx.params, B256::ZERO), fx.params);
        let witness = transfer_witness(&fx, friend_bits(&fx, 2));
        let proof = adapter.prove(&witness).await.unwrap();
        assert!(adapter.verify(&witness.public_inputs(), &proof).await.unwrap());
    }

    #[tokio::test]
    async fn test_transfer_below_threshold_rejected() {
        let fx = fixture();
        let adapter = ProofAdapter::new(ReferenceBackend::new(fx.params, B256::ZERO), fx.params);
        let witness = transfer_witness(&fx, friend_bits(&fx, 1));
        assert!(matches!(
            adapter.prove(&witness).await,
            Err(ProverError::ConstraintViolation { circuit: Circuit::Transfer, .. })
        ));
    }

    #[tokio::test]
    async fn test_null_slot_bits_do_not_count() {
        let fx = fixture();
        let adapter = ProofAdapter::new(ReferenceBackend::new(fx.params, B256::ZERO), fx.params);
        let mut vlist = friend_bits(&fx, 1);
        for (bit, addr) in vlist.iter_mut().zip(&fx.addresses) {
            if *addr == B256::ZERO {
                *bit = true;
            }
        }
        let witness = transfer_witness(&fx, vlist);
        assert!(adapter.prove(&witness).await.is_err());
    }

    #[tokio::test]
    async fn test_pre_transfer_wrong_passphrase_rejected() {
        let fx = fixture();
        let backend = ReferenceBackend::new(fx.params, B256::ZERO);
        let address_new = pad_address(Address::repeat_byte(0xEE));
        let root = FriendMerkleTree::from_leaves(fx.addresses.clone()).root();
        let witness = Witness::PreTransfer(PreTransferWitness {
            public: PreTransferPublicInputs {
                commit_root: fx.commit_root,
                commit_root_t: commit_root_t(root, fx.passphrase, fx.threshold, address_new),
                address_new,
                nonce: fx.nonce,
            },
            addresses: fx.addresses.clone(),
            passphrase: pad_str("wrong").unwrap(),
            threshold: fx.threshold,
        });
        let public = encode_public(&witness.public_inputs(), &fx.params).unwrap();
        let private = encode_private(&witness, &fx.params).unwrap();
        assert!(matches!(
            backend.prove(Circuit::PreTransfer, &public, &private).await,
            Err(ProverError::ConstraintViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_proof_bound_to_public_inputs_and_seed() {
        let fx = fixture();
        let backend = ReferenceBackend::new(fx.params, B256::repeat_byte(1));
        let witness = transfer_witness(&fx, friend_bits(&fx, 3));
        let public = encode_public(&witness.public_inputs(), &fx.params).unwrap();
        let private = encode_private(&witness, &fx.params).unwrap();
        let proof = backend.prove(Circuit::Transfer, &public, &private).await.unwrap();
        assert_eq!(proof.len(), PROOF_BUF_LEN);

        assert!(backend.verify(Circuit::Transfer, &public, &proof).await.unwrap());

        let mut other_public = public.clone();
        other_public[32] ^= 1;
        assert!(!backend.verify(Circuit::Transfer, &other_public, &proof).await.unwrap());

        let other_seed = ReferenceBackend::new(fx.params, B256::repeat_byte(2));
        assert!(!other_seed.verify(Circuit::Transfer, &public, &proof).await.unwrap());
    }
}
