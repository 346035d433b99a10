use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::adapters::proof_adapter::{Proof, ProofAdapter};
use crate::adapters::verification_tree::VerificationTree;
use crate::domain::encoding::{decode_path, pad_address, pad_int};
use crate::domain::invitation::invitation_len;
use crate::domain::merkle::PathProof;
use crate::domain::records::{CommitRecord, PreTransferRecord, VerificationRecord, VerifiedBitmap};
use crate::domain::witness::{
    PreTransferPublicInputs, PreparationPublicInputs, PublicInputs, TransferPublicInputs,
};
use crate::ports::ledger::{
    CommitArgs, LedgerError, LedgerEvent, LedgerPort, PreTransferArgs, PreparationArgs,
    Submission, TransferArgs, VerificationArgs, VerificationNotice,
};
use crate::ports::prover::{Circuit, ProofBackend};

#[derive(Default)]
struct LedgerState {
    block_num: u64,
    commits: Vec<CommitRecord>,
    pre_transfers: Vec<PreTransferRecord>,
    invitations: Vec<Vec<Bytes>>,
    verifications: Vec<VerificationRecord>,
    receipts: Vec<Bytes>,
    tree: VerificationTree,
    balances: HashMap<Address, U256>,
}

impl LedgerState {
    fn next_block(&mut self) -> u64 {
        self.block_num += 1;
        self.block_num
    }

    fn commit(&self, index: u64) -> Result<&CommitRecord, LedgerError> {
        self.commits
            .get(index as usize)
            .ok_or(LedgerError::NotFound { kind: "commit", index })
    }

    fn pre_transfer(&self, index: u64) -> Result<&PreTransferRecord, LedgerError> {
        self.pre_transfers
            .get(index as usize)
            .ok_or(LedgerError::NotFound { kind: "pre-transfer", index })
    }
}

/// In-process ledger verifying every submitted proof against public inputs
/// it derives from its own records.
///
/// All state sits behind one lock, so submissions are applied one at a time
/// and each sees the effects of every earlier one.
pub struct InMemoryLedger<B: ProofBackend> {
    adapter: Arc<ProofAdapter<B>>,
    state: Mutex<LedgerState>,
}

impl<B: ProofBackend> InMemoryLedger<B> {
    pub fn new(adapter: Arc<ProofAdapter<B>>) -> Self {
        Self {
            adapter,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Credit `amount` to `address` (test and demo setup).
    pub async fn fund(&self, address: Address, amount: U256) {
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(address).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub async fn block_num(&self) -> u64 {
        self.state.lock().await.block_num
    }

    async fn check_proof(
        &self,
        circuit: Circuit,
        public: PublicInputs,
        proof: Bytes,
    ) -> Result<(), LedgerError> {
        let proof = Proof::from_bytes(circuit, proof)?;
        if !self.adapter.verify(&public, &proof).await? {
            return Err(LedgerError::InvalidProof(circuit.label()));
        }
        Ok(())
    }

    fn authorize(
        record: &PreTransferRecord,
        sender: Address,
        action: &'static str,
        pre_transfer_index: u64,
    ) -> Result<(), LedgerError> {
        if record.sender != sender {
            return Err(LedgerError::Unauthorized {
                sender,
                action,
                pre_transfer_index,
            });
        }
        if record.transferred {
            return Err(LedgerError::AlreadyTransferred(pre_transfer_index));
        }
        Ok(())
    }
}

impl<B: ProofBackend> LedgerPort for InMemoryLedger<B> {
    // ========== Submissions ==========

    async fn submit_commit(&self, sender: Address, args: CommitArgs) -> Result<Submission, LedgerError> {
        let mut state = self.state.lock().await;
        let index = state.commits.len() as u64;
        state.commits.push(CommitRecord {
            sender,
            commit_root: args.commit_root,
            limit: args.limit,
            nonce: args.nonce,
            notes: args.notes,
        });
        let block_num = state.next_block();
        info!(commit_index = index, %sender, "commit accepted");
        Ok(Submission {
            index,
            block_num,
            events: vec![LedgerEvent::Commit { commit_index: index }],
        })
    }

    async fn submit_pre_transfer(
        &self,
        sender: Address,
        args: PreTransferArgs,
    ) -> Result<Submission, LedgerError> {
        let params = *self.adapter.params();
        let length = invitation_len(&params);
        if args.invitations.len() != params.max_friends_len
            || args.invitations.iter().any(|inv| inv.len() != length)
        {
            return Err(LedgerError::InvalidInvitationCount {
                expected: params.max_friends_len,
                length,
                actual: args.invitations.len(),
            });
        }

        let mut state = self.state.lock().await;
        let commit = state.commit(args.commit_index)?;
        let public = PublicInputs::PreTransfer(PreTransferPublicInputs {
            commit_root: commit.commit_root,
            commit_root_t: args.commit_root_t,
            address_new: pad_address(sender),
            nonce: commit.nonce,
        });
        self.check_proof(Circuit::PreTransfer, public, args.proof).await?;

        let index = state.pre_transfers.len() as u64;
        let block_num = state.next_block();
        state.pre_transfers.push(PreTransferRecord {
            sender,
            commit_index: args.commit_index,
            verified: VerifiedBitmap::new(params.max_friends_len),
            block_num,
            commit_root_t: args.commit_root_t,
            transferred: false,
        });
        state.invitations.push(args.invitations.clone());

        let mut events = vec![LedgerEvent::PreTransfer {
            pre_transfer_index: index,
            commit_index: args.commit_index,
        }];
        events.extend(args.invitations.into_iter().map(|invitation| LedgerEvent::Invitation {
            pre_transfer_index: index,
            invitation,
        }));
        info!(pre_transfer_index = index, commit_index = args.commit_index, %sender, "pre-transfer accepted");
        Ok(Submission {
            index,
            block_num,
            events,
        })
    }

    async fn submit_verification(
        &self,
        sender: Address,
        args: VerificationArgs,
    ) -> Result<Submission, LedgerError> {
        let mut state = self.state.lock().await;
        let index = state.tree.insert(args.verification)?;
        state.verifications.push(VerificationRecord {
            sender,
            verification: args.verification,
            pre_transfer_commitment: args.pre_transfer_commitment,
            nonce2: args.nonce2,
        });
        state.receipts.push(args.verification_receipt.clone());
        let block_num = state.next_block();
        info!(verification_index = index, %sender, "verification accepted");
        Ok(Submission {
            index,
            block_num,
            events: vec![LedgerEvent::Verification {
                verification_index: index,
                verification_receipt: args.verification_receipt,
            }],
        })
    }

    async fn submit_preparation(
        &self,
        sender: Address,
        args: PreparationArgs,
    ) -> Result<Submission, LedgerError> {
        let params = *self.adapter.params();
        let index = args.pre_transfer_index;
        let mut state = self.state.lock().await;

        let record = state.pre_transfer(index)?;
        Self::authorize(record, sender, "prepare", index)?;
        if args.slot >= params.max_friends_len as u64 {
            return Err(LedgerError::SlotOutOfRange {
                slot: args.slot,
                slots: params.max_friends_len,
            });
        }
        if record.verified.get(args.slot as usize) {
            return Err(LedgerError::SlotAlreadyVerified {
                pre_transfer_index: index,
                slot: args.slot,
            });
        }
        if !state.tree.is_known_root(args.verification_root) {
            return Err(LedgerError::UnknownVerificationRoot(args.verification_root));
        }

        let commit = state.commit(record.commit_index)?;
        let public = PublicInputs::Preparation(PreparationPublicInputs {
            commit_root: commit.commit_root,
            friend_directions: decode_path(args.slot, params.friends_merkle_depth()),
            nonce: commit.nonce,
            pre_transfer_index: pad_int(index),
            verification_root: args.verification_root,
        });
        self.check_proof(Circuit::Preparation, public, args.proof).await?;

        let block_num = state.next_block();
        if let Some(record) = state.pre_transfers.get_mut(index as usize) {
            record.verified.mark(args.slot as usize);
        }
        debug!(pre_transfer_index = index, slot = args.slot, "slot verified");
        Ok(Submission {
            index,
            block_num,
            events: vec![LedgerEvent::Preparation {
                pre_transfer_index: index,
                slot: args.slot,
            }],
        })
    }

    async fn submit_transfer(&self, sender: Address, args: TransferArgs) -> Result<Submission, LedgerError> {
        let index = args.pre_transfer_index;
        let mut state = self.state.lock().await;

        let record = state.pre_transfer(index)?;
        Self::authorize(record, sender, "transfer", index)?;
        let vlist = record.verified.bits().to_vec();
        let commit = state.commit(record.commit_index)?;
        let (from, limit) = (commit.sender, commit.limit);
        let public = PublicInputs::Transfer(TransferPublicInputs {
            commit_root: commit.commit_root,
            vlist,
        });
        self.check_proof(Circuit::Transfer, public, args.proof).await?;

        let available = state.balances.get(&from).copied().unwrap_or_default();
        let amount = available.min(limit);
        state.balances.insert(from, available - amount);
        let credited = state.balances.entry(sender).or_default();
        *credited = credited.saturating_add(amount);
        if let Some(record) = state.pre_transfers.get_mut(index as usize) {
            record.transferred = true;
        }
        let block_num = state.next_block();
        info!(pre_transfer_index = index, %from, to = %sender, %amount, "transfer executed");
        Ok(Submission {
            index,
            block_num,
            events: vec![LedgerEvent::Transfer {
                pre_transfer_index: index,
                from,
                to: sender,
                amount,
            }],
        })
    }

    // ========== Reads ==========

    async fn commit(&self, index: u64) -> Result<CommitRecord, LedgerError> {
        self.state.lock().await.commit(index).cloned()
    }

    async fn pre_transfer(&self, index: u64) -> Result<PreTransferRecord, LedgerError> {
        self.state.lock().await.pre_transfer(index).cloned()
    }

    async fn verification(&self, index: u64) -> Result<VerificationRecord, LedgerError> {
        self.state
            .lock()
            .await
            .verifications
            .get(index as usize)
            .cloned()
            .ok_or(LedgerError::NotFound { kind: "verification", index })
    }

    async fn verification_path_proof(&self, index: u64) -> Result<PathProof, LedgerError> {
        self.state
            .lock()
            .await
            .tree
            .path_proof(index)
            .ok_or(LedgerError::NotFound { kind: "verification", index })
    }

    async fn invitations(&self, pre_transfer_index: u64) -> Result<Vec<Bytes>, LedgerError> {
        self.state
            .lock()
            .await
            .invitations
            .get(pre_transfer_index as usize)
            .cloned()
            .ok_or(LedgerError::NotFound {
                kind: "pre-transfer",
                index: pre_transfer_index,
            })
    }

    async fn verification_notices(&self, from: u64) -> Vec<VerificationNotice> {
        let state = self.state.lock().await;
        state
            .receipts
            .iter()
            .enumerate()
            .skip(from as usize)
            .map(|(index, receipt)| VerificationNotice {
                verification_index: index as u64,
                verification_receipt: receipt.clone(),
            })
            .collect()
    }

    async fn verification_count(&self) -> u64 {
        self.state.lock().await.tree.len()
    }

    async fn balance(&self, address: Address) -> U256 {
        self.state
            .lock()
            .await
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::reference_backend::ReferenceBackend;
    use crate::domain::commitment::{commit_root, commit_root_t};
    use crate::domain::encoding::pad_str;
    use crate::domain::friends::extend_friends;
    use crate::domain::invitation::filler_invitation;
    use crate::domain::merkle::FriendMerkleTree;
    use crate::domain::params::{ProtocolParams, PROOF_BUF_LEN};
    use crate::domain::witness::{PreTransferWitness, TransferWitness, Witness};

    const OLD: Address = Address::repeat_byte(0x0A);
    const NEW: Address = Address::repeat_byte(0x0B);

    struct TestFixture {
        params: ProtocolParams,
        adapter: Arc<ProofAdapter<ReferenceBackend>>,
        ledger: InMemoryLedger<ReferenceBackend>,
        addresses: Vec<B256>,
        passphrase: B256,
        threshold: B256,
        nonce: B256,
    }

    impl TestFixture {
        fn new() -> Self {
            let params = ProtocolParams::new(4, 32).unwrap();
            let adapter = Arc::new(ProofAdapter::new(
                ReferenceBackend::new(params, B256::repeat_byte(0x5E)),
                params,
            ));
            let friends = vec![Address::repeat_byte(1), Address::repeat_byte(2)];
            let passphrase = pad_str("hunter2").unwrap();
            let threshold = pad_int(1);
            let nonce = B256::repeat_byte(0x33);
            let extended = extend_friends(&friends, passphrase, threshold, nonce, &params).unwrap();
            Self {
                params,
                ledger: InMemoryLedger::new(adapter.clone()),
                adapter,
                addresses: extended.padded(),
                passphrase,
                threshold,
                nonce,
            }
        }

        fn addr_root(&self) -> B256 {
            FriendMerkleTree::from_leaves(self.addresses.clone()).root()
        }

        fn commit_root(&self) -> B256 {
            commit_root(self.addr_root(), self.passphrase, self.threshold, self.nonce)
        }

        fn invitations(&self) -> Vec<Bytes> {
            (0..self.params.max_friends_len)
                .map(|_| Bytes::from(filler_invitation(&self.params)))
                .collect()
        }

        async fn commit(&self) -> u64 {
            self.ledger
                .submit_commit(
                    OLD,
                    CommitArgs {
                        commit_root: self.commit_root(),
                        limit: U256::from(500),
                        nonce: self.nonce,
                        notes: "notes".into(),
                    },
                )
                .await
                .unwrap()
                .index
        }

        async fn pre_transfer(&self, commit_index: u64) -> Submission {
            let address_new = pad_address(NEW);
            let root_t = commit_root_t(self.addr_root(), self.passphrase, self.threshold, address_new);
            let witness = Witness::PreTransfer(PreTransferWitness {
                public: PreTransferPublicInputs {
                    commit_root: self.commit_root(),
                    commit_root_t: root_t,
                    address_new,
                    nonce: self.nonce,
                },
                addresses: self.addresses.clone(),
                passphrase: self.passphrase,
                threshold: self.threshold,
            });
            let proof = self.adapter.prove(&witness).await.unwrap();
            self.ledger
                .submit_pre_transfer(
                    NEW,
                    PreTransferArgs {
                        commit_index,
                        commit_root_t: root_t,
                        proof: proof.into_bytes(),
                        invitations: self.invitations(),
                    },
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_commit_roundtrip() {
        let fx = TestFixture::new();
        let index = fx.commit().await;
        assert_eq!(index, 0);
        let record = fx.ledger.commit(0).await.unwrap();
        assert_eq!(record.sender, OLD);
        assert_eq!(record.commit_root, fx.commit_root());
        assert_eq!(fx.ledger.block_num().await, 1);
        assert!(matches!(
            fx.ledger.commit(1).await,
            Err(LedgerError::NotFound { kind: "commit", index: 1 })
        ));
    }

    #[tokio::test]
    async fn test_pre_transfer_emits_invitations_in_order() {
        let fx = TestFixture::new();
        let commit_index = fx.commit().await;
        let submission = fx.pre_transfer(commit_index).await;

        assert!(matches!(
            submission.events[0],
            LedgerEvent::PreTransfer { pre_transfer_index: 0, commit_index: 0 }
        ));
        assert_eq!(submission.invitations().len(), fx.params.max_friends_len);
        assert_eq!(
            fx.ledger.invitations(0).await.unwrap(),
            submission.invitations()
        );

        let record = fx.ledger.pre_transfer(0).await.unwrap();
        assert_eq!(record.sender, NEW);
        assert_eq!(record.verified.count(), 0);
        assert!(!record.transferred);
    }

    #[tokio::test]
    async fn test_pre_transfer_rejects_wrong_invitation_count() {
        let fx = TestFixture::new();
        let commit_index = fx.commit().await;
        let mut invitations = fx.invitations();
        invitations.pop();
        let result = fx
            .ledger
            .submit_pre_transfer(
                NEW,
                PreTransferArgs {
                    commit_index,
                    commit_root_t: B256::ZERO,
                    proof: Bytes::from(vec![0u8; PROOF_BUF_LEN]),
                    invitations,
                },
            )
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidInvitationCount { actual: 3, .. })));
    }

    #[tokio::test]
    async fn test_pre_transfer_rejects_forged_proof() {
        let fx = TestFixture::new();
        let commit_index = fx.commit().await;
        let result = fx
            .ledger
            .submit_pre_transfer(
                NEW,
                PreTransferArgs {
                    commit_index,
                    commit_root_t: B256::repeat_byte(1),
                    proof: Bytes::from(vec![0u8; PROOF_BUF_LEN]),
                    invitations: fx.invitations(),
                },
            )
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidProof("pre-transfer"))));
    }

    #[tokio::test]
    async fn test_proof_from_other_sender_rejected() {
        let fx = TestFixture::new();
        let commit_index = fx.commit().await;
        let submission = fx.pre_transfer(commit_index).await;
        assert_eq!(submission.index, 0);

        // Same proof resubmitted by another address binds a different address_new.
        let root_t = fx.ledger.pre_transfer(0).await.unwrap().commit_root_t;
        let witness = Witness::PreTransfer(PreTransferWitness {
            public: PreTransferPublicInputs {
                commit_root: fx.commit_root(),
                commit_root_t: root_t,
                address_new: pad_address(NEW),
                nonce: fx.nonce,
            },
            addresses: fx.addresses.clone(),
            passphrase: fx.passphrase,
            threshold: fx.threshold,
        });
        let proof = fx.adapter.prove(&witness).await.unwrap();
        let result = fx
            .ledger
            .submit_pre_transfer(
                Address::repeat_byte(0xCC),
                PreTransferArgs {
                    commit_index,
                    commit_root_t: root_t,
                    proof: proof.into_bytes(),
                    invitations: fx.invitations(),
                },
            )
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidProof(_))));
    }

    #[tokio::test]
    async fn test_preparation_restricted_to_claimant() {
        let fx = TestFixture::new();
        let commit_index = fx.commit().await;
        fx.pre_transfer(commit_index).await;

        let result = fx
            .ledger
            .submit_preparation(
                Address::repeat_byte(0xCC),
                PreparationArgs {
                    pre_transfer_index: 0,
                    slot: 0,
                    verification_root: B256::ZERO,
                    proof: Bytes::from(vec![0u8; PROOF_BUF_LEN]),
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::Unauthorized { action: "prepare", pre_transfer_index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_preparation_checks_slot_and_root() {
        let fx = TestFixture::new();
        let commit_index = fx.commit().await;
        fx.pre_transfer(commit_index).await;

        let args = |slot, verification_root| PreparationArgs {
            pre_transfer_index: 0,
            slot,
            verification_root,
            proof: Bytes::from(vec![0u8; PROOF_BUF_LEN]),
        };
        assert!(matches!(
            fx.ledger.submit_preparation(NEW, args(4, B256::ZERO)).await,
            Err(LedgerError::SlotOutOfRange { slot: 4, slots: 4 })
        ));
        assert!(matches!(
            fx.ledger.submit_preparation(NEW, args(1, B256::repeat_byte(7))).await,
            Err(LedgerError::UnknownVerificationRoot(_))
        ));
    }

    #[tokio::test]
    async fn test_transfer_without_verifications_rejected() {
        let fx = TestFixture::new();
        let commit_index = fx.commit().await;
        fx.pre_transfer(commit_index).await;
        fx.ledger.fund(OLD, U256::from(1_000)).await;

        // Threshold 1 with an empty bitmap cannot be proven.
        let witness = Witness::Transfer(TransferWitness {
            public: TransferPublicInputs {
                commit_root: fx.commit_root(),
                vlist: vec![false; fx.params.max_friends_len],
            },
            addresses: fx.addresses.clone(),
            passphrase: fx.passphrase,
            threshold: fx.threshold,
            nonce: fx.nonce,
        });
        assert!(fx.adapter.prove(&witness).await.is_err());

        let result = fx
            .ledger
            .submit_transfer(
                NEW,
                TransferArgs {
                    pre_transfer_index: 0,
                    proof: Bytes::from(vec![0u8; PROOF_BUF_LEN]),
                },
            )
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidProof("transfer"))));
        assert_eq!(fx.ledger.balance(OLD).await, U256::from(1_000));
    }

    #[tokio::test]
    async fn test_verifications_extend_tree() {
        let fx = TestFixture::new();
        for i in 0..3u8 {
            let submission = fx
                .ledger
                .submit_verification(
                    Address::repeat_byte(i + 1),
                    VerificationArgs {
                        verification: B256::repeat_byte(i + 1),
                        pre_transfer_commitment: B256::ZERO,
                        nonce2: B256::ZERO,
                        verification_receipt: Bytes::from(vec![i]),
                    },
                )
                .await
                .unwrap();
            assert_eq!(submission.index, i as u64);
            assert_eq!(submission.verification_receipt(), Some(Bytes::from(vec![i])));
        }
        assert_eq!(fx.ledger.verification_count().await, 3);
        let proof = fx.ledger.verification_path_proof(1).await.unwrap();
        assert_eq!(proof.leaf, B256::repeat_byte(2));
        assert!(proof.verify());

        let notices = fx.ledger.verification_notices(1).await;
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].verification_index, 1);
    }
}
