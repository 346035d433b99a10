//! Five-phase recovery run: commit → pre-transfer → verification →
//! preparation → transfer.
//!
//! A [`RecoverySession`] is scoped to one run. It re-derives the extended
//! friend list and its tree from the plan and the committed nonce whenever a
//! phase needs them, so nothing secret is persisted between calls. Each phase
//! returns an outcome carrying the [`PhaseLog`] of what it did.
//!
//! Friends act through [`verify_as_friend`], independently of the session and
//! of each other.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::adapters::proof_adapter::ProofAdapter;
use crate::crypto::encryption::DecryptFailure;
use crate::domain::commitment::{commit_root, commit_root_t, pre_transfer_commitment, verification};
use crate::domain::encoding::{pad_address, pad_int, pad_str, random_nonce};
use crate::domain::friends::{canonicalize, extend_friends, ExtendedFriendList};
use crate::domain::invitation::{
    decrypt_verification_receipt, encrypt_invitation, encrypt_verification_receipt,
    filler_invitation, Invitation,
};
use crate::domain::merkle::{FriendMerkleTree, PathProof};
use crate::domain::params::ProtocolParams;
use crate::domain::records::{CommitRecord, PreTransferRecord};
use crate::domain::validation::ValidationError;
use crate::domain::witness::{
    PreTransferPublicInputs, PreTransferWitness, PreparationPublicInputs, PreparationWitness,
    TransferPublicInputs, TransferWitness, Witness,
};
use crate::ports::keystore::{KeyStore, KeyStoreError};
use crate::ports::ledger::{
    CommitArgs, LedgerError, LedgerEvent, LedgerPort, PreTransferArgs, PreparationArgs,
    TransferArgs, VerificationArgs, VerificationNotice,
};
use crate::ports::prover::{ProofBackend, ProverError};

pub use crate::domain::invitation::scan_invitations;

/// Errors that abort a recovery run.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{subject} mismatch: local {local}, ledger {ledger}")]
    Integrity {
        subject: &'static str,
        local: B256,
        ledger: B256,
    },

    #[error("prover error: {0}")]
    Prover(#[from] ProverError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("invitation claims {claimed} but the commit belongs to {committed}")]
    ClaimMismatch { claimed: Address, committed: Address },

    #[error("session is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: SessionState,
    },
}

fn ensure_match(subject: &'static str, local: B256, ledger: B256) -> Result<(), ProtocolError> {
    if local != ledger {
        return Err(ProtocolError::Integrity {
            subject,
            local,
            ledger,
        });
    }
    Ok(())
}

// ========== Phase log ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Commit,
    PreTransfer,
    Verification,
    Preparation,
    Transfer,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Commit => "commit",
            Phase::PreTransfer => "pre-transfer",
            Phase::Verification => "verification",
            Phase::Preparation => "preparation",
            Phase::Transfer => "transfer",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub phase: Phase,
    pub message: String,
}

/// Append-only record of what one phase call did. Entries are also emitted as
/// `tracing` events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseLog {
    entries: Vec<LogEntry>,
}

impl PhaseLog {
    pub fn push(&mut self, phase: Phase, message: impl Into<String>) {
        let message = message.into();
        info!(%phase, "{message}");
        self.entries.push(LogEntry { phase, message });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: PhaseLog) {
        self.entries.extend(other.entries);
    }
}

// ========== Session ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Planned,
    Committed,
    PreTransferred,
    Verifying,
    Preparing,
    Transferred,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The secret inputs both the holder and a later claimant know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub friends: Vec<Address>,
    pub passphrase: String,
    pub threshold: u64,
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub commit_index: u64,
    pub commit_root: B256,
    pub log: PhaseLog,
}

#[derive(Debug, Clone)]
pub struct PreTransferOutcome {
    pub pre_transfer_index: u64,
    pub commit_root_t: B256,
    /// Shuffled ciphertexts as published, `max_friends_len` of them.
    pub invitations: Vec<Bytes>,
    pub log: PhaseLog,
}

/// A decrypted, ledger-checked verification ready for a preparation proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedVerification {
    pub verification_index: u64,
    pub friend: Address,
    pub nonce1: B256,
    pub nonce2: B256,
    pub verification: B256,
    pub path: PathProof,
}

/// Why a notice was skipped during collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptFailure {
    /// Not encrypted to the claimant's key.
    Decrypt(DecryptFailure),
    /// Addressed to the claimant but for another pre-transfer.
    ForeignPreTransfer(u64),
    /// Submitted by an address outside the plan.
    UnknownFriend(Address),
}

#[derive(Debug, Clone)]
pub struct ReceiptBatch {
    pub collected: Vec<CollectedVerification>,
    pub failures: Vec<(u64, ReceiptFailure)>,
    pub log: PhaseLog,
}

/// What a preparation proof targets.
#[derive(Debug, Clone, Copy)]
pub enum PrepareTarget<'a> {
    Genuine(&'a CollectedVerification),
    /// The n-th null slot of the extended list.
    Decoy(usize),
}

#[derive(Debug, Clone)]
pub struct PrepareOutcome {
    pub slot: u64,
    pub log: PhaseLog,
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub log: PhaseLog,
}

/// One recovery run, from the holder's commit to the claimant's transfer.
///
/// Generic over `LedgerPort` (record storage), `ProofBackend` (behind the
/// proof adapter) and `KeyStore` (account unlocking).
pub struct RecoverySession<L: LedgerPort, B: ProofBackend, K: KeyStore> {
    ledger: Arc<L>,
    prover: Arc<ProofAdapter<B>>,
    keys: Arc<K>,
    params: ProtocolParams,
    plan: RecoveryPlan,
    passphrase: B256,
    threshold: B256,
    state: SessionState,
    commit_index: Option<u64>,
    commit: Option<CommitRecord>,
    claimant: Option<Address>,
    pre_transfer_index: Option<u64>,
}

impl<L: LedgerPort, B: ProofBackend, K: KeyStore> RecoverySession<L, B, K> {
    /// Validate `plan` and open a session in `Planned` state. No external call is made.
    pub fn new(
        ledger: Arc<L>,
        prover: Arc<ProofAdapter<B>>,
        keys: Arc<K>,
        plan: RecoveryPlan,
    ) -> Result<Self, ProtocolError> {
        let params = *prover.params();
        params.validate()?;
        canonicalize(&plan.friends, &params)?;
        if plan.threshold > params.max_friends_len as u64 {
            return Err(ValidationError::ThresholdTooLarge {
                threshold: plan.threshold,
                max: params.max_friends_len,
            }
            .into());
        }
        let passphrase = pad_str(&plan.passphrase)?;
        Ok(Self {
            ledger,
            prover,
            keys,
            params,
            passphrase,
            threshold: pad_int(plan.threshold),
            plan,
            state: SessionState::Planned,
            commit_index: None,
            commit: None,
            claimant: None,
            pre_transfer_index: None,
        })
    }

    /// Join a run whose commit is already on the ledger.
    ///
    /// Fails with an integrity error if `plan` does not open the stored commit root.
    pub async fn resume(
        ledger: Arc<L>,
        prover: Arc<ProofAdapter<B>>,
        keys: Arc<K>,
        plan: RecoveryPlan,
        commit_index: u64,
    ) -> Result<Self, ProtocolError> {
        let mut session = Self::new(ledger, prover, keys, plan)?;
        let record = session.ledger.commit(commit_index).await?;
        let (_, tree) = session.friend_tree(record.nonce)?;
        let local = commit_root(tree.root(), session.passphrase, session.threshold, record.nonce);
        ensure_match("commit_root", local, record.commit_root)?;

        debug!(commit_index, "session resumed");
        session.commit_index = Some(commit_index);
        session.commit = Some(record);
        session.state = SessionState::Committed;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn plan(&self) -> &RecoveryPlan {
        &self.plan
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn commit_index(&self) -> Option<u64> {
        self.commit_index
    }

    pub fn pre_transfer_index(&self) -> Option<u64> {
        self.pre_transfer_index
    }

    fn expect_state(&self, allowed: &[SessionState], expected: &'static str) -> Result<(), ProtocolError> {
        if !allowed.contains(&self.state) {
            return Err(ProtocolError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn friend_tree(&self, nonce: B256) -> Result<(ExtendedFriendList, FriendMerkleTree), ValidationError> {
        let extended = extend_friends(&self.plan.friends, self.passphrase, self.threshold, nonce, &self.params)?;
        let tree = FriendMerkleTree::build(&extended);
        Ok((extended, tree))
    }

    fn committed(&self) -> Result<(u64, &CommitRecord), ProtocolError> {
        match (self.commit_index, &self.commit) {
            (Some(index), Some(record)) => Ok((index, record)),
            _ => Err(ProtocolError::InvalidState {
                expected: "Committed",
                actual: self.state,
            }),
        }
    }

    fn claim(&self) -> Result<(Address, u64), ProtocolError> {
        match (self.claimant, self.pre_transfer_index) {
            (Some(claimant), Some(index)) => Ok((claimant, index)),
            _ => Err(ProtocolError::InvalidState {
                expected: "PreTransferred",
                actual: self.state,
            }),
        }
    }

    // ========== Phase 1: commit ==========

    /// Commit with a fresh nonce.
    pub async fn commit(
        &mut self,
        holder: Address,
        limit: U256,
        notes: impl Into<String>,
    ) -> Result<CommitOutcome, ProtocolError> {
        self.commit_with_nonce(holder, limit, notes, random_nonce()).await
    }

    pub async fn commit_with_nonce(
        &mut self,
        holder: Address,
        limit: U256,
        notes: impl Into<String>,
        nonce: B256,
    ) -> Result<CommitOutcome, ProtocolError> {
        self.expect_state(&[SessionState::Planned], "Planned")?;
        let mut log = PhaseLog::default();

        self.keys.account(holder)?;
        let (_, tree) = self.friend_tree(nonce)?;
        let root = commit_root(tree.root(), self.passphrase, self.threshold, nonce);

        let submission = self
            .ledger
            .submit_commit(
                holder,
                CommitArgs {
                    commit_root: root,
                    limit,
                    nonce,
                    notes: notes.into(),
                },
            )
            .await?;
        let record = self.ledger.commit(submission.index).await?;
        ensure_match("commit_root", root, record.commit_root)?;

        log.push(
            Phase::Commit,
            format!("{holder} committed #{} at block {}", submission.index, submission.block_num),
        );
        self.commit_index = Some(submission.index);
        self.commit = Some(record);
        self.state = SessionState::Committed;
        Ok(CommitOutcome {
            commit_index: submission.index,
            commit_root: root,
            log,
        })
    }

    // ========== Phase 2: pre-transfer ==========

    /// Claim the committed account for `claimant`; `notes[i]` goes to `plan.friends[i]`.
    pub async fn pre_transfer(
        &mut self,
        claimant: Address,
        notes: &[String],
    ) -> Result<PreTransferOutcome, ProtocolError> {
        self.expect_state(&[SessionState::Committed], "Committed")?;
        if notes.len() != self.plan.friends.len() {
            return Err(ValidationError::NoteCountMismatch {
                notes: notes.len(),
                friends: self.plan.friends.len(),
            }
            .into());
        }
        if let Some(note) = notes.iter().find(|n| n.len() > self.params.max_note_len) {
            return Err(ValidationError::NoteTooLong {
                len: note.len(),
                max: self.params.max_note_len,
            }
            .into());
        }
        let mut log = PhaseLog::default();
        self.keys.account(claimant)?;

        let (commit_index, _) = self.committed()?;
        let record = self.ledger.commit(commit_index).await?;
        let (extended, tree) = self.friend_tree(record.nonce)?;
        let addr_root = tree.root();
        ensure_match(
            "commit_root",
            commit_root(addr_root, self.passphrase, self.threshold, record.nonce),
            record.commit_root,
        )?;

        let address_new = pad_address(claimant);
        let root_t = commit_root_t(addr_root, self.passphrase, self.threshold, address_new);
        let witness = Witness::PreTransfer(PreTransferWitness {
            public: PreTransferPublicInputs {
                commit_root: record.commit_root,
                commit_root_t: root_t,
                address_new,
                nonce: record.nonce,
            },
            addresses: extended.padded(),
            passphrase: self.passphrase,
            threshold: self.threshold,
        });
        let proof = self.prover.prove(&witness).await?;
        log.push(Phase::PreTransfer, "pre-transfer proof generated");

        let mut invitations = Vec::with_capacity(self.params.max_friends_len);
        for (friend, note) in self.plan.friends.iter().zip(notes) {
            let public_key = self.keys.public_key(*friend)?;
            invitations.push(Bytes::from(encrypt_invitation(
                &public_key,
                record.sender,
                note,
                &self.params,
            )?));
        }
        while invitations.len() < self.params.max_friends_len {
            invitations.push(Bytes::from(filler_invitation(&self.params)));
        }
        invitations.shuffle(&mut rand::thread_rng());

        let submission = self
            .ledger
            .submit_pre_transfer(
                claimant,
                PreTransferArgs {
                    commit_index,
                    commit_root_t: root_t,
                    proof: proof.into_bytes(),
                    invitations,
                },
            )
            .await?;
        let stored = self.ledger.pre_transfer(submission.index).await?;
        ensure_match("commit_root_t", root_t, stored.commit_root_t)?;

        log.push(
            Phase::PreTransfer,
            format!(
                "{claimant} pre-transferred #{} against commit #{commit_index}",
                submission.index
            ),
        );
        self.claimant = Some(claimant);
        self.pre_transfer_index = Some(submission.index);
        self.commit = Some(record);
        self.state = SessionState::PreTransferred;
        Ok(PreTransferOutcome {
            pre_transfer_index: submission.index,
            commit_root_t: root_t,
            invitations: submission.invitations(),
            log,
        })
    }

    // ========== Phase 3: receipt collection ==========

    /// Decrypt and check verification receipts.
    ///
    /// Notices not meant for this run are skipped and reported in
    /// `failures`; only disagreement with ledger records aborts.
    pub async fn collect_verifications(
        &mut self,
        notices: &[VerificationNotice],
    ) -> Result<ReceiptBatch, ProtocolError> {
        self.expect_state(
            &[SessionState::PreTransferred, SessionState::Verifying],
            "PreTransferred or Verifying",
        )?;
        let (claimant, pre_transfer_index) = self.claim()?;
        let account = self.keys.account(claimant)?;
        let mut log = PhaseLog::default();
        let mut collected = Vec::new();
        let mut failures = Vec::new();

        for notice in notices {
            let index = notice.verification_index;
            let receipt = match decrypt_verification_receipt(account.secret_key(), &notice.verification_receipt) {
                Ok(receipt) => receipt,
                Err(failure) => {
                    debug!(verification_index = index, %failure, "receipt not addressed to claimant");
                    failures.push((index, ReceiptFailure::Decrypt(failure)));
                    continue;
                }
            };
            if receipt.pre_transfer_index != pre_transfer_index {
                failures.push((index, ReceiptFailure::ForeignPreTransfer(receipt.pre_transfer_index)));
                continue;
            }

            let record = self.ledger.verification(index).await?;
            if !self.plan.friends.contains(&record.sender) {
                warn!(verification_index = index, sender = %record.sender, "receipt from outside the friend list");
                failures.push((index, ReceiptFailure::UnknownFriend(record.sender)));
                continue;
            }

            let ptc = pre_transfer_commitment(pre_transfer_index, receipt.nonce1);
            ensure_match("pre_transfer_commitment", ptc, record.pre_transfer_commitment)?;
            ensure_match(
                "verification",
                verification(ptc, record.sender, record.nonce2),
                record.verification,
            )?;
            let path = self.ledger.verification_path_proof(index).await?;
            ensure_match("verification_leaf", record.verification, path.leaf)?;
            ensure_match("verification_root", path.replay(), path.root)?;

            log.push(
                Phase::Verification,
                format!("collected verification #{index} from {}", record.sender),
            );
            collected.push(CollectedVerification {
                verification_index: index,
                friend: record.sender,
                nonce1: receipt.nonce1,
                nonce2: record.nonce2,
                verification: record.verification,
                path,
            });
        }

        self.state = SessionState::Verifying;
        Ok(ReceiptBatch {
            collected,
            failures,
            log,
        })
    }

    // ========== Phase 4: preparation ==========

    /// Mark one slot of the pre-transfer's bitmap.
    ///
    /// Decoys target a null slot with fresh nonces and reuse the path proof of
    /// verification #0, so at least one verification must exist.
    pub async fn prepare(&mut self, target: PrepareTarget<'_>) -> Result<PrepareOutcome, ProtocolError> {
        self.expect_state(
            &[
                SessionState::PreTransferred,
                SessionState::Verifying,
                SessionState::Preparing,
            ],
            "PreTransferred, Verifying or Preparing",
        )?;
        let (claimant, pre_transfer_index) = self.claim()?;
        let (_, record) = self.committed()?;
        let (commit_root_value, nonce) = (record.commit_root, record.nonce);
        let (extended, tree) = self.friend_tree(nonce)?;

        let logical_index = match target {
            PrepareTarget::Genuine(collected) => self
                .plan
                .friends
                .iter()
                .position(|f| *f == collected.friend)
                .ok_or_else(|| ValidationError::InvalidIdentifier(collected.friend.to_string()))?,
            PrepareTarget::Decoy(n) => self.plan.friends.len() + n,
        };
        let slot = extended.extended_index_of(&self.plan.friends, logical_index)?;
        let friend_path = tree
            .path_proof(slot)
            .ok_or(ValidationError::LogicalIndexOutOfRange {
                index: logical_index,
                slots: extended.len(),
            })?;

        let (nonce1, nonce2, verification_path) = match target {
            PrepareTarget::Genuine(collected) => (collected.nonce1, collected.nonce2, collected.path.clone()),
            PrepareTarget::Decoy(_) => (
                random_nonce(),
                random_nonce(),
                self.ledger.verification_path_proof(0).await?,
            ),
        };

        let witness = Witness::Preparation(PreparationWitness {
            public: PreparationPublicInputs {
                commit_root: commit_root_value,
                friend_directions: friend_path.directions.clone(),
                nonce,
                pre_transfer_index: pad_int(pre_transfer_index),
                verification_root: verification_path.root,
            },
            friend_address: friend_path.leaf,
            friend_path: friend_path.siblings,
            passphrase: self.passphrase,
            threshold: self.threshold,
            verification: verification_path.leaf,
            verification_nonce1: nonce1,
            verification_nonce2: nonce2,
            verification_path: verification_path.siblings,
            verification_directions: verification_path.directions,
        });
        let proof = self.prover.prove(&witness).await?;
        self.ledger
            .submit_preparation(
                claimant,
                PreparationArgs {
                    pre_transfer_index,
                    slot: slot as u64,
                    verification_root: verification_path.root,
                    proof: proof.into_bytes(),
                },
            )
            .await?;

        let mut log = PhaseLog::default();
        log.push(Phase::Preparation, format!("slot {slot} prepared"));
        self.state = SessionState::Preparing;
        Ok(PrepareOutcome {
            slot: slot as u64,
            log,
        })
    }

    // ========== Phase 5: transfer ==========

    pub async fn transfer(&mut self) -> Result<TransferOutcome, ProtocolError> {
        self.expect_state(
            &[
                SessionState::PreTransferred,
                SessionState::Verifying,
                SessionState::Preparing,
            ],
            "PreTransferred, Verifying or Preparing",
        )?;
        let (claimant, pre_transfer_index) = self.claim()?;
        let pre_transfer = self.ledger.pre_transfer(pre_transfer_index).await?;
        let record = self.ledger.commit(pre_transfer.commit_index).await?;
        let (extended, tree) = self.friend_tree(record.nonce)?;
        ensure_match(
            "commit_root",
            commit_root(tree.root(), self.passphrase, self.threshold, record.nonce),
            record.commit_root,
        )?;

        let witness = Witness::Transfer(TransferWitness {
            public: TransferPublicInputs {
                commit_root: record.commit_root,
                vlist: pre_transfer.verified.bits().to_vec(),
            },
            addresses: extended.padded(),
            passphrase: self.passphrase,
            threshold: self.threshold,
            nonce: record.nonce,
        });
        let proof = self.prover.prove(&witness).await?;
        let submission = self
            .ledger
            .submit_transfer(
                claimant,
                TransferArgs {
                    pre_transfer_index,
                    proof: proof.into_bytes(),
                },
            )
            .await?;

        let (from, to, amount) = submission
            .events
            .iter()
            .find_map(|event| match event {
                LedgerEvent::Transfer { from, to, amount, .. } => Some((*from, *to, *amount)),
                _ => None,
            })
            .ok_or(LedgerError::MissingEvent {
                event: "Transfer",
                index: submission.index,
            })?;

        let mut log = PhaseLog::default();
        log.push(Phase::Transfer, format!("moved {amount} from {from} to {to}"));
        self.state = SessionState::Transferred;
        Ok(TransferOutcome {
            from,
            to,
            amount,
            log,
        })
    }
}

// ========== Friend side ==========

/// What a friend learns about a pre-transfer before deciding to vouch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReview {
    /// Account named by the commit the pre-transfer points at.
    pub committed: Address,
    /// Address asking to take the account over.
    pub claimant: Address,
    /// The invitation addressed to this friend, if one was published.
    pub invitation: Option<Invitation>,
}

impl ClaimReview {
    /// The invitation names a different account than the commit.
    pub fn mismatch(&self) -> Option<Address> {
        self.invitation
            .as_ref()
            .map(|invitation| invitation.claimed_address)
            .filter(|claimed| *claimed != self.committed)
    }
}

#[derive(Debug, Clone)]
pub struct FriendVerification {
    pub verification_index: u64,
    /// The invitation addressed to this friend, if one was published.
    pub invitation: Option<Invitation>,
    pub log: PhaseLog,
}

/// Read pre-transfer `pre_transfer_index` and look for an invitation to `friend`.
pub async fn review_claim<L: LedgerPort, K: KeyStore>(
    ledger: &L,
    keys: &K,
    params: &ProtocolParams,
    friend: Address,
    pre_transfer_index: u64,
) -> Result<ClaimReview, ProtocolError> {
    let account = keys.account(friend)?;
    let pre_transfer = ledger.pre_transfer(pre_transfer_index).await?;
    let commit = ledger.commit(pre_transfer.commit_index).await?;
    let invitations = ledger.invitations(pre_transfer_index).await?;
    let invitation = scan_invitations(
        account.secret_key(),
        invitations.iter().map(|inv| &inv[..]),
        params,
    )
    .into_iter()
    .next();
    Ok(ClaimReview {
        committed: commit.sender,
        claimant: pre_transfer.sender,
        invitation,
    })
}

/// Vouch for pre-transfer `pre_transfer_index` as `friend`.
///
/// Refuses with [`ProtocolError::ClaimMismatch`], before submitting anything,
/// when the friend's invitation names another account than the commit.
/// Independent of every other friend; safe to run concurrently.
pub async fn verify_as_friend<L: LedgerPort, K: KeyStore>(
    ledger: &L,
    keys: &K,
    params: &ProtocolParams,
    friend: Address,
    pre_transfer_index: u64,
) -> Result<FriendVerification, ProtocolError> {
    let review = review_claim(ledger, keys, params, friend, pre_transfer_index).await?;
    if let Some(claimed) = review.mismatch() {
        warn!(%friend, %claimed, committed = %review.committed, "refusing to vouch");
        return Err(ProtocolError::ClaimMismatch {
            claimed,
            committed: review.committed,
        });
    }

    let mut log = PhaseLog::default();
    log.push(
        Phase::Verification,
        format!("{friend} trusting {} as {}", review.claimant, review.committed),
    );

    let claimant_key = keys.public_key(review.claimant)?;
    let nonce1 = random_nonce();
    let nonce2 = random_nonce();
    let ptc = pre_transfer_commitment(pre_transfer_index, nonce1);
    let submission = ledger
        .submit_verification(
            friend,
            VerificationArgs {
                verification: verification(ptc, friend, nonce2),
                pre_transfer_commitment: ptc,
                nonce2,
                verification_receipt: Bytes::from(encrypt_verification_receipt(
                    &claimant_key,
                    pre_transfer_index,
                    nonce1,
                )),
            },
        )
        .await?;

    log.push(
        Phase::Verification,
        format!("{friend} submitted verification #{}", submission.index),
    );
    Ok(FriendVerification {
        verification_index: submission.index,
        invitation: review.invitation,
        log,
    })
}

// ========== Audit ==========

/// Replay the ledger's path proof for each verification and check its leaf
/// against the stored record.
pub async fn audit_verification_proofs<L: LedgerPort>(
    ledger: &L,
    indices: &[u64],
) -> Result<(), ProtocolError> {
    for &index in indices {
        let record = ledger.verification(index).await?;
        let path = ledger.verification_path_proof(index).await?;
        ensure_match("verification_leaf", record.verification, path.leaf)?;
        ensure_match("verification_root", path.replay(), path.root)?;
        debug!(verification_index = index, "verification path audited");
    }
    Ok(())
}

/// Slots whose bit is set in a pre-transfer's bitmap.
pub fn verified_slots(record: &PreTransferRecord) -> Vec<usize> {
    record.verified.verified_slots()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::json_keystore::JsonKeyStore;
    use crate::adapters::memory_ledger::InMemoryLedger;
    use crate::adapters::reference_backend::ReferenceBackend;
    use crate::domain::records::VerificationRecord;
    use crate::ports::ledger::Submission;

    type Session = RecoverySession<InMemoryLedger<ReferenceBackend>, ReferenceBackend, JsonKeyStore>;

    /// Delegates to an in-memory ledger, optionally dropping transfer events
    /// or serving substitute invitations.
    struct ScriptedLedger {
        inner: Arc<InMemoryLedger<ReferenceBackend>>,
        drop_transfer_events: bool,
        invitations: Option<Vec<Bytes>>,
    }

    impl ScriptedLedger {
        fn over(inner: Arc<InMemoryLedger<ReferenceBackend>>) -> Self {
            Self {
                inner,
                drop_transfer_events: false,
                invitations: None,
            }
        }
    }

    impl LedgerPort for ScriptedLedger {
        async fn submit_commit(&self, sender: Address, args: CommitArgs) -> Result<Submission, LedgerError> {
            self.inner.submit_commit(sender, args).await
        }

        async fn submit_pre_transfer(
            &self,
            sender: Address,
            args: PreTransferArgs,
        ) -> Result<Submission, LedgerError> {
            self.inner.submit_pre_transfer(sender, args).await
        }

        async fn submit_verification(
            &self,
            sender: Address,
            args: VerificationArgs,
        ) -> Result<Submission, LedgerError> {
            self.inner.submit_verification(sender, args).await
        }

        async fn submit_preparation(
            &self,
            sender: Address,
            args: PreparationArgs,
        ) -> Result<Submission, LedgerError> {
            self.inner.submit_preparation(sender, args).await
        }

        async fn submit_transfer(&self, sender: Address, args: TransferArgs) -> Result<Submission, LedgerError> {
            let mut submission = self.inner.submit_transfer(sender, args).await?;
            if self.drop_transfer_events {
                submission.events.clear();
            }
            Ok(submission)
        }

        async fn commit(&self, index: u64) -> Result<CommitRecord, LedgerError> {
            self.inner.commit(index).await
        }

        async fn pre_transfer(&self, index: u64) -> Result<PreTransferRecord, LedgerError> {
            self.inner.pre_transfer(index).await
        }

        async fn verification(&self, index: u64) -> Result<VerificationRecord, LedgerError> {
            self.inner.verification(index).await
        }

        async fn verification_path_proof(&self, index: u64) -> Result<PathProof, LedgerError> {
            self.inner.verification_path_proof(index).await
        }

        async fn invitations(&self, pre_transfer_index: u64) -> Result<Vec<Bytes>, LedgerError> {
            match &self.invitations {
                Some(invitations) => Ok(invitations.clone()),
                None => self.inner.invitations(pre_transfer_index).await,
            }
        }

        async fn verification_notices(&self, from: u64) -> Vec<VerificationNotice> {
            self.inner.verification_notices(from).await
        }

        async fn verification_count(&self) -> u64 {
            self.inner.verification_count().await
        }

        async fn balance(&self, address: Address) -> U256 {
            self.inner.balance(address).await
        }
    }

    struct TestFixture {
        ledger: Arc<InMemoryLedger<ReferenceBackend>>,
        prover: Arc<ProofAdapter<ReferenceBackend>>,
        keys: Arc<JsonKeyStore>,
        params: ProtocolParams,
        old: Address,
        new: Address,
        friends: Vec<Address>,
    }

    impl TestFixture {
        fn new(friend_count: usize) -> Self {
            let params = ProtocolParams::new(8, 64).unwrap();
            let prover = Arc::new(ProofAdapter::new(
                ReferenceBackend::new(params, B256::repeat_byte(0x42)),
                params,
            ));
            let keys = JsonKeyStore::generate(friend_count + 2);
            let old = keys.nth(0).unwrap().address;
            let new = keys.nth(1).unwrap().address;
            let friends = (2..friend_count + 2).map(|i| keys.nth(i).unwrap().address).collect();
            Self {
                ledger: Arc::new(InMemoryLedger::new(prover.clone())),
                prover,
                keys: Arc::new(keys),
                params,
                old,
                new,
                friends,
            }
        }

        fn plan(&self, threshold: u64) -> RecoveryPlan {
            RecoveryPlan {
                friends: self.friends.clone(),
                passphrase: "open sesame".into(),
                threshold,
            }
        }

        fn session(&self, plan: RecoveryPlan) -> Result<Session, ProtocolError> {
            RecoverySession::new(self.ledger.clone(), self.prover.clone(), self.keys.clone(), plan)
        }

        fn notes(&self) -> Vec<String> {
            self.friends.iter().map(|f| format!("hi {f}")).collect()
        }
    }

    #[tokio::test]
    async fn test_threshold_too_large_before_any_call() {
        let fx = TestFixture::new(2);
        let result = fx.session(fx.plan(9));
        assert!(matches!(
            result,
            Err(ProtocolError::Validation(ValidationError::ThresholdTooLarge { threshold: 9, max: 8 }))
        ));
        assert_eq!(fx.ledger.block_num().await, 0);
    }

    #[tokio::test]
    async fn test_long_passphrase_rejected() {
        let fx = TestFixture::new(2);
        let mut plan = fx.plan(1);
        plan.passphrase = "x".repeat(33);
        assert!(matches!(
            fx.session(plan),
            Err(ProtocolError::Validation(ValidationError::PassphraseTooLong(33)))
        ));
    }

    #[tokio::test]
    async fn test_phase_order_enforced() {
        let fx = TestFixture::new(2);
        let mut session = fx.session(fx.plan(1)).unwrap();
        assert!(matches!(
            session.transfer().await,
            Err(ProtocolError::InvalidState { actual: SessionState::Planned, .. })
        ));
        assert!(matches!(
            session.pre_transfer(fx.new, &fx.notes()).await,
            Err(ProtocolError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_then_resume() {
        let fx = TestFixture::new(3);
        let mut holder = fx.session(fx.plan(2)).unwrap();
        let outcome = holder
            .commit(fx.old, U256::from(100), "recovery notes")
            .await
            .unwrap();
        assert_eq!(holder.state(), SessionState::Committed);
        assert_eq!(outcome.log.len(), 1);

        let claimant = RecoverySession::resume(
            fx.ledger.clone(),
            fx.prover.clone(),
            fx.keys.clone(),
            fx.plan(2),
            outcome.commit_index,
        )
        .await
        .unwrap();
        assert_eq!(claimant.state(), SessionState::Committed);
    }

    #[tokio::test]
    async fn test_resume_with_wrong_passphrase_is_integrity_error() {
        let fx = TestFixture::new(3);
        let mut holder = fx.session(fx.plan(2)).unwrap();
        let outcome = holder.commit(fx.old, U256::from(100), "").await.unwrap();

        let mut plan = fx.plan(2);
        plan.passphrase = "guess".into();
        let result = RecoverySession::resume(
            fx.ledger.clone(),
            fx.prover.clone(),
            fx.keys.clone(),
            plan,
            outcome.commit_index,
        )
        .await;
        assert!(matches!(
            result,
            Err(ProtocolError::Integrity { subject: "commit_root", .. })
        ));
    }

    #[tokio::test]
    async fn test_note_count_mismatch() {
        let fx = TestFixture::new(2);
        let mut session = fx.session(fx.plan(1)).unwrap();
        session.commit(fx.old, U256::from(1), "").await.unwrap();
        let result = session.pre_transfer(fx.new, &["only one".to_string()]).await;
        assert!(matches!(
            result,
            Err(ProtocolError::Validation(ValidationError::NoteCountMismatch { notes: 1, friends: 2 }))
        ));
        assert_eq!(session.state(), SessionState::Committed);
    }

    #[tokio::test]
    async fn test_friend_reads_invitation() {
        let fx = TestFixture::new(2);
        let mut session = fx.session(fx.plan(1)).unwrap();
        session.commit(fx.old, U256::from(1), "").await.unwrap();
        let pre = session.pre_transfer(fx.new, &fx.notes()).await.unwrap();
        assert_eq!(pre.invitations.len(), fx.params.max_friends_len);

        let friend = fx.friends[1];
        let verified = verify_as_friend(
            fx.ledger.as_ref(),
            fx.keys.as_ref(),
            &fx.params,
            friend,
            pre.pre_transfer_index,
        )
        .await
        .unwrap();
        let invitation = verified.invitation.unwrap();
        assert_eq!(invitation.claimed_address, fx.old);
        assert_eq!(invitation.note, format!("hi {friend}"));
        audit_verification_proofs(fx.ledger.as_ref(), &[verified.verification_index])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transfer_below_threshold_fails_in_prover() {
        let fx = TestFixture::new(2);
        let mut session = fx.session(fx.plan(2)).unwrap();
        session.commit(fx.old, U256::from(1), "").await.unwrap();
        session.pre_transfer(fx.new, &fx.notes()).await.unwrap();
        assert!(matches!(
            session.transfer().await,
            Err(ProtocolError::Prover(ProverError::ConstraintViolation { .. }))
        ));
    }

    #[tokio::test]
    async fn test_transfer_without_event_is_an_error() {
        let fx = TestFixture::new(1);
        fx.ledger.fund(fx.old, U256::from(50)).await;
        let ledger = Arc::new(ScriptedLedger {
            drop_transfer_events: true,
            ..ScriptedLedger::over(fx.ledger.clone())
        });
        let mut session =
            RecoverySession::new(ledger.clone(), fx.prover.clone(), fx.keys.clone(), fx.plan(1)).unwrap();
        session.commit(fx.old, U256::from(20), "").await.unwrap();
        let pre = session.pre_transfer(fx.new, &fx.notes()).await.unwrap();
        verify_as_friend(
            ledger.as_ref(),
            fx.keys.as_ref(),
            &fx.params,
            fx.friends[0],
            pre.pre_transfer_index,
        )
        .await
        .unwrap();
        let notices = ledger.verification_notices(0).await;
        let batch = session.collect_verifications(&notices).await.unwrap();
        session.prepare(PrepareTarget::Genuine(&batch.collected[0])).await.unwrap();

        assert!(matches!(
            session.transfer().await,
            Err(ProtocolError::Ledger(LedgerError::MissingEvent { event: "Transfer", .. }))
        ));
        assert_eq!(session.state(), SessionState::Preparing);
    }

    #[tokio::test]
    async fn test_friend_refuses_mismatched_invitation() {
        let fx = TestFixture::new(2);
        let mut session = fx.session(fx.plan(1)).unwrap();
        session.commit(fx.old, U256::from(1), "").await.unwrap();
        let pre = session.pre_transfer(fx.new, &fx.notes()).await.unwrap();

        let friend = fx.friends[0];
        let impostor = Address::repeat_byte(0x66);
        let mut forged = vec![Bytes::from(
            encrypt_invitation(&fx.keys.public_key(friend).unwrap(), impostor, "it's me", &fx.params).unwrap(),
        )];
        forged.extend((1..fx.params.max_friends_len).map(|_| Bytes::from(filler_invitation(&fx.params))));
        let ledger = ScriptedLedger {
            invitations: Some(forged),
            ..ScriptedLedger::over(fx.ledger.clone())
        };

        let review = review_claim(&ledger, fx.keys.as_ref(), &fx.params, friend, pre.pre_transfer_index)
            .await
            .unwrap();
        assert_eq!(review.committed, fx.old);
        assert_eq!(review.claimant, fx.new);
        assert_eq!(review.mismatch(), Some(impostor));

        let result =
            verify_as_friend(&ledger, fx.keys.as_ref(), &fx.params, friend, pre.pre_transfer_index).await;
        assert!(matches!(
            result,
            Err(ProtocolError::ClaimMismatch { claimed, committed }) if claimed == impostor && committed == fx.old
        ));
        assert_eq!(fx.ledger.verification_count().await, 0);
    }

    #[test]
    fn test_phase_log_appends() {
        let mut log = PhaseLog::default();
        log.push(Phase::Commit, "a");
        let mut other = PhaseLog::default();
        other.push(Phase::Transfer, "b");
        log.extend(other);
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[1].phase, Phase::Transfer);
    }
}
