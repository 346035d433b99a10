use std::future::Future;

use alloy_primitives::{Address, Bytes, B256, U256};

use crate::domain::merkle::PathProof;
use crate::domain::records::{CommitRecord, PreTransferRecord, VerificationRecord};
use crate::ports::prover::ProverError;

/// Errors surfaced by a ledger implementation.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{kind} #{index} not found")]
    NotFound { kind: &'static str, index: u64 },

    #[error("{sender} may not {action} pre-transfer #{pre_transfer_index}")]
    Unauthorized {
        sender: Address,
        action: &'static str,
        pre_transfer_index: u64,
    },

    #[error("{0} proof rejected")]
    InvalidProof(&'static str),

    #[error("unknown verification root {0}")]
    UnknownVerificationRoot(B256),

    #[error("slot {slot} out of range for {slots} slots")]
    SlotOutOfRange { slot: u64, slots: usize },

    #[error("slot {slot} of pre-transfer #{pre_transfer_index} already verified")]
    SlotAlreadyVerified { pre_transfer_index: u64, slot: u64 },

    #[error("pre-transfer #{0} already transferred")]
    AlreadyTransferred(u64),

    #[error("expected {expected} invitations of {length} bytes, got {actual}")]
    InvalidInvitationCount {
        expected: usize,
        length: usize,
        actual: usize,
    },

    #[error("verification tree is full")]
    TreeFull,

    #[error("accepted submission #{index} carries no {event} event")]
    MissingEvent { event: &'static str, index: u64 },

    #[error("proof verification failed: {0}")]
    Prover(#[from] ProverError),
}

/// Event emitted by an accepted submission, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Commit {
        commit_index: u64,
    },
    PreTransfer {
        pre_transfer_index: u64,
        commit_index: u64,
    },
    Invitation {
        pre_transfer_index: u64,
        invitation: Bytes,
    },
    Verification {
        verification_index: u64,
        verification_receipt: Bytes,
    },
    Preparation {
        pre_transfer_index: u64,
        slot: u64,
    },
    Transfer {
        pre_transfer_index: u64,
        from: Address,
        to: Address,
        amount: U256,
    },
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Ledger-assigned index of the stored record.
    pub index: u64,
    pub block_num: u64,
    pub events: Vec<LedgerEvent>,
}

impl Submission {
    /// Invitation payloads, in emission order.
    pub fn invitations(&self) -> Vec<Bytes> {
        self.events
            .iter()
            .filter_map(|event| match event {
                LedgerEvent::Invitation { invitation, .. } => Some(invitation.clone()),
                _ => None,
            })
            .collect()
    }

    /// The encrypted receipt attached to a verification submission.
    pub fn verification_receipt(&self) -> Option<Bytes> {
        self.events.iter().find_map(|event| match event {
            LedgerEvent::Verification {
                verification_receipt,
                ..
            } => Some(verification_receipt.clone()),
            _ => None,
        })
    }
}

/// A verification receipt as published on the ledger, for claimants to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationNotice {
    pub verification_index: u64,
    pub verification_receipt: Bytes,
}

/// Arguments of a commit submission.
#[derive(Debug, Clone)]
pub struct CommitArgs {
    pub commit_root: B256,
    pub limit: U256,
    pub nonce: B256,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct PreTransferArgs {
    pub commit_index: u64,
    pub commit_root_t: B256,
    pub proof: Bytes,
    pub invitations: Vec<Bytes>,
}

#[derive(Debug, Clone)]
pub struct VerificationArgs {
    pub verification: B256,
    pub pre_transfer_commitment: B256,
    pub nonce2: B256,
    pub verification_receipt: Bytes,
}

#[derive(Debug, Clone)]
pub struct PreparationArgs {
    pub pre_transfer_index: u64,
    /// Physical slot in the extended friend list.
    pub slot: u64,
    pub verification_root: B256,
    pub proof: Bytes,
}

#[derive(Debug, Clone)]
pub struct TransferArgs {
    pub pre_transfer_index: u64,
    pub proof: Bytes,
}

/// Distributed ledger holding protocol records.
///
/// Each submission either returns an accepted record (with its index and
/// events) or fails; the ledger serializes conflicting writes. `sender` is
/// the address that signed the submission.
pub trait LedgerPort: Send + Sync {
    // ========== Submissions ==========

    fn submit_commit(
        &self,
        sender: Address,
        args: CommitArgs,
    ) -> impl Future<Output = Result<Submission, LedgerError>> + Send;

    fn submit_pre_transfer(
        &self,
        sender: Address,
        args: PreTransferArgs,
    ) -> impl Future<Output = Result<Submission, LedgerError>> + Send;

    fn submit_verification(
        &self,
        sender: Address,
        args: VerificationArgs,
    ) -> impl Future<Output = Result<Submission, LedgerError>> + Send;

    /// Restricted to the pre-transfer's sender.
    fn submit_preparation(
        &self,
        sender: Address,
        args: PreparationArgs,
    ) -> impl Future<Output = Result<Submission, LedgerError>> + Send;

    /// Restricted to the pre-transfer's sender.
    fn submit_transfer(
        &self,
        sender: Address,
        args: TransferArgs,
    ) -> impl Future<Output = Result<Submission, LedgerError>> + Send;

    // ========== Reads ==========

    fn commit(&self, index: u64) -> impl Future<Output = Result<CommitRecord, LedgerError>> + Send;

    fn pre_transfer(
        &self,
        index: u64,
    ) -> impl Future<Output = Result<PreTransferRecord, LedgerError>> + Send;

    fn verification(
        &self,
        index: u64,
    ) -> impl Future<Output = Result<VerificationRecord, LedgerError>> + Send;

    /// Path proof of verification `index` against the current verification root.
    fn verification_path_proof(
        &self,
        index: u64,
    ) -> impl Future<Output = Result<PathProof, LedgerError>> + Send;

    /// Encrypted invitations published with pre-transfer `pre_transfer_index`, in emission order.
    fn invitations(
        &self,
        pre_transfer_index: u64,
    ) -> impl Future<Output = Result<Vec<Bytes>, LedgerError>> + Send;

    /// Verification receipts with index `>= from`, ascending.
    fn verification_notices(
        &self,
        from: u64,
    ) -> impl Future<Output = Vec<VerificationNotice>> + Send;

    fn verification_count(&self) -> impl Future<Output = u64> + Send;

    fn balance(&self, address: Address) -> impl Future<Output = U256> + Send;
}
