use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

/// The three proving circuits of the recovery protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Circuit {
    PreTransfer,
    Preparation,
    Transfer,
}

impl Circuit {
    pub fn label(self) -> &'static str {
        match self {
            Circuit::PreTransfer => "pre-transfer",
            Circuit::Preparation => "preparation",
            Circuit::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors that can occur during proof generation or verification.
#[derive(Debug, thiserror::Error)]
pub enum ProverError {
    #[error("{circuit} constraints not satisfied: {reason}")]
    ConstraintViolation {
        circuit: Circuit,
        reason: String,
    },

    #[error("malformed {circuit} inputs: {reason}")]
    MalformedInputs {
        circuit: Circuit,
        reason: String,
    },

    #[error("{circuit} proof is {actual} bytes, expected {expected}")]
    InvalidProofLength {
        circuit: Circuit,
        expected: usize,
        actual: usize,
    },

    #[error("{circuit} prover timed out")]
    Timeout { circuit: Circuit },

    #[error("proving backend failed: {0}")]
    Backend(String),
}

/// Opaque proving system consuming flat, fixed-width input buffers.
///
/// Implementations may wrap an in-process library or shell out to an
/// external prover; callers never look inside the proof bytes.
pub trait ProofBackend: Send + Sync {
    /// Produce a proof for `circuit` from its flattened public and private inputs.
    fn prove(
        &self,
        circuit: Circuit,
        public_inputs: &[u8],
        private_inputs: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, ProverError>> + Send;

    /// Check `proof` against the flattened public inputs of `circuit`.
    fn verify(
        &self,
        circuit: Circuit,
        public_inputs: &[u8],
        proof: &[u8],
    ) -> impl Future<Output = Result<bool, ProverError>> + Send;
}
