//! Structured-to-flat marshaling in front of a [`ProofBackend`].
//!
//! Every hash-like field is 32 bytes; every direction or bitmap bit is one
//! byte (`0` or `1`). Fields are concatenated in a fixed per-circuit order:
//!
//! | circuit      | public                                                                   | private |
//! |--------------|--------------------------------------------------------------------------|---------|
//! | pre-transfer | commit_root, commit_root_t, address_new, nonce                           | addresses[N], passphrase, threshold |
//! | preparation  | commit_root, friend_directions[D], nonce, pre_transfer_index, verification_root | friend_address, friend_path[D], passphrase, threshold, verification, nonce1, nonce2, verification_path[32], verification_directions[32] |
//! | transfer     | commit_root, vlist[N]                                                    | addresses[N], passphrase, threshold, nonce |

use std::time::Duration;

use alloy_primitives::{Bytes, B256};
use tracing::debug;

use crate::domain::params::{ProtocolParams, PROOF_BUF_LEN, VERIFICATION_MERKLE_DEPTH};
use crate::domain::witness::{
    PreTransferPublicInputs, PreTransferWitness, PreparationPublicInputs, PreparationWitness,
    PublicInputs, TransferPublicInputs, TransferWitness, Witness,
};
use crate::ports::prover::{Circuit, ProofBackend, ProverError};

/// Proof bytes of exactly `PROOF_BUF_LEN` length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof(Bytes);

impl Proof {
    pub fn from_bytes(circuit: Circuit, bytes: impl Into<Bytes>) -> Result<Self, ProverError> {
        let bytes = bytes.into();
        if bytes.len() != PROOF_BUF_LEN {
            return Err(ProverError::InvalidProofLength {
                circuit,
                expected: PROOF_BUF_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Wraps a backend with the circuit layouts, the proof-length contract and an
/// optional wait bound.
pub struct ProofAdapter<B: ProofBackend> {
    backend: B,
    params: ProtocolParams,
    /// Bounds how long the adapter waits; the backend call itself runs to completion.
    timeout: Option<Duration>,
}

impl<B: ProofBackend> ProofAdapter<B> {
    pub fn new(backend: B, params: ProtocolParams) -> Self {
        Self {
            backend,
            params,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// Marshal `witness`, run the backend and check the proof length.
    ///
    /// Failures are returned as-is; inputs are deterministic, so retrying
    /// without changing them cannot succeed.
    pub async fn prove(&self, witness: &Witness) -> Result<Proof, ProverError> {
        let circuit = witness.circuit();
        let public = encode_public(&witness.public_inputs(), &self.params)?;
        let private = encode_private(witness, &self.params)?;
        debug!(%circuit, public_len = public.len(), private_len = private.len(), "proving");

        let call = self.backend.prove(circuit, &public, &private);
        let raw = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ProverError::Timeout { circuit })??,
            None => call.await?,
        };
        Proof::from_bytes(circuit, raw)
    }

    /// Check `proof` against structured public inputs.
    pub async fn verify(&self, public: &PublicInputs, proof: &Proof) -> Result<bool, ProverError> {
        let circuit = public.circuit();
        let encoded = encode_public(public, &self.params)?;
        self.backend.verify(circuit, &encoded, proof.as_bytes()).await
    }
}

// ========== Encoding ==========

struct FieldWriter {
    circuit: Circuit,
    buf: Vec<u8>,
}

impl FieldWriter {
    fn new(circuit: Circuit) -> Self {
        Self {
            circuit,
            buf: Vec::new(),
        }
    }

    fn word(&mut self, value: B256) -> &mut Self {
        self.buf.extend_from_slice(value.as_slice());
        self
    }

    fn words(&mut self, name: &str, values: &[B256], expected: usize) -> Result<&mut Self, ProverError> {
        check_len(self.circuit, name, values.len(), expected)?;
        for value in values {
            self.buf.extend_from_slice(value.as_slice());
        }
        Ok(self)
    }

    fn bits(&mut self, name: &str, values: &[u8], expected: usize) -> Result<&mut Self, ProverError> {
        check_len(self.circuit, name, values.len(), expected)?;
        if values.iter().any(|&b| b > 1) {
            return Err(ProverError::MalformedInputs {
                circuit: self.circuit,
                reason: format!("{name} must contain only 0/1"),
            });
        }
        self.buf.extend_from_slice(values);
        Ok(self)
    }

    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

fn check_len(circuit: Circuit, name: &str, actual: usize, expected: usize) -> Result<(), ProverError> {
    if actual != expected {
        return Err(ProverError::MalformedInputs {
            circuit,
            reason: format!("{name} has {actual} entries, expected {expected}"),
        });
    }
    Ok(())
}

fn bools_to_bits(values: &[bool]) -> Vec<u8> {
    values.iter().map(|&b| u8::from(b)).collect()
}

/// Flatten public inputs in circuit order.
pub fn encode_public(public: &PublicInputs, params: &ProtocolParams) -> Result<Vec<u8>, ProverError> {
    let mut w = FieldWriter::new(public.circuit());
    match public {
        PublicInputs::PreTransfer(p) => {
            w.word(p.commit_root)
                .word(p.commit_root_t)
                .word(p.address_new)
                .word(p.nonce);
        }
        PublicInputs::Preparation(p) => {
            w.word(p.commit_root)
                .bits("friend_directions", &p.friend_directions, params.friends_merkle_depth())?
                .word(p.nonce)
                .word(p.pre_transfer_index)
                .word(p.verification_root);
        }
        PublicInputs::Transfer(p) => {
            w.word(p.commit_root)
                .bits("vlist", &bools_to_bits(&p.vlist), params.max_friends_len)?;
        }
    }
    Ok(w.finish())
}

/// Flatten private inputs in circuit order.
pub fn encode_private(witness: &Witness, params: &ProtocolParams) -> Result<Vec<u8>, ProverError> {
    let mut w = FieldWriter::new(witness.circuit());
    match witness {
        Witness::PreTransfer(p) => {
            w.words("addresses", &p.addresses, params.max_friends_len)?
                .word(p.passphrase)
                .word(p.threshold);
        }
        Witness::Preparation(p) => {
            w.word(p.friend_address)
                .words("friend_path", &p.friend_path, params.friends_merkle_depth())?
                .word(p.passphrase)
                .word(p.threshold)
                .word(p.verification)
                .word(p.verification_nonce1)
                .word(p.verification_nonce2)
                .words("verification_path", &p.verification_path, VERIFICATION_MERKLE_DEPTH)?
                .bits(
                    "verification_directions",
                    &p.verification_directions,
                    VERIFICATION_MERKLE_DEPTH,
                )?;
        }
        Witness::Transfer(p) => {
            w.words("addresses", &p.addresses, params.max_friends_len)?
                .word(p.passphrase)
                .word(p.threshold)
                .word(p.nonce);
        }
    }
    Ok(w.finish())
}

// ========== Decoding ==========

/// Cursor over a flat input buffer; used by backends that evaluate circuits natively.
pub struct FieldReader<'a> {
    circuit: Circuit,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(circuit: Circuit, buf: &'a [u8]) -> Self {
        Self { circuit, buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProverError> {
        let end = self.pos + len;
        let slice = self.buf.get(self.pos..end).ok_or(ProverError::MalformedInputs {
            circuit: self.circuit,
            reason: format!("buffer ends at {} bytes, needed {end}", self.buf.len()),
        })?;
        self.pos = end;
        Ok(slice)
    }

    pub fn word(&mut self) -> Result<B256, ProverError> {
        self.take(32).map(B256::from_slice)
    }

    pub fn words(&mut self, count: usize) -> Result<Vec<B256>, ProverError> {
        (0..count).map(|_| self.word()).collect()
    }

    pub fn bits(&mut self, count: usize) -> Result<Vec<u8>, ProverError> {
        let bits = self.take(count)?;
        if bits.iter().any(|&b| b > 1) {
            return Err(ProverError::MalformedInputs {
                circuit: self.circuit,
                reason: "bit field contains a value other than 0/1".into(),
            });
        }
        Ok(bits.to_vec())
    }

    /// Fail if unread bytes remain.
    pub fn finish(self) -> Result<(), ProverError> {
        if self.pos != self.buf.len() {
            return Err(ProverError::MalformedInputs {
                circuit: self.circuit,
                reason: format!("{} trailing bytes", self.buf.len() - self.pos),
            });
        }
        Ok(())
    }
}

/// Inverse of [`encode_public`].
pub fn decode_public(
    circuit: Circuit,
    bytes: &[u8],
    params: &ProtocolParams,
) -> Result<PublicInputs, ProverError> {
    let mut r = FieldReader::new(circuit, bytes);
    let public = match circuit {
        Circuit::PreTransfer => PublicInputs::PreTransfer(PreTransferPublicInputs {
            commit_root: r.word()?,
            commit_root_t: r.word()?,
            address_new: r.word()?,
            nonce: r.word()?,
        }),
        Circuit::Preparation => PublicInputs::Preparation(PreparationPublicInputs {
            commit_root: r.word()?,
            friend_directions: r.bits(params.friends_merkle_depth())?,
            nonce: r.word()?,
            pre_transfer_index: r.word()?,
            verification_root: r.word()?,
        }),
        Circuit::Transfer => PublicInputs::Transfer(TransferPublicInputs {
            commit_root: r.word()?,
            vlist: r.bits(params.max_friends_len)?.into_iter().map(|b| b == 1).collect(),
        }),
    };
    r.finish()?;
    Ok(public)
}

/// Inverse of [`encode_private`], combined with already decoded public inputs.
pub fn decode_witness(
    public: PublicInputs,
    private: &[u8],
    params: &ProtocolParams,
) -> Result<Witness, ProverError> {
    let mut r = FieldReader::new(public.circuit(), private);
    let witness = match public {
        PublicInputs::PreTransfer(public) => Witness::PreTransfer(PreTransferWitness {
            public,
            addresses: r.words(params.max_friends_len)?,
            passphrase: r.word()?,
            threshold: r.word()?,
        }),
        PublicInputs::Preparation(public) => Witness::Preparation(PreparationWitness {
            public,
            friend_address: r.word()?,
            friend_path: r.words(params.friends_merkle_depth())?,
            passphrase: r.word()?,
            threshold: r.word()?,
            verification: r.word()?,
            verification_nonce1: r.word()?,
            verification_nonce2: r.word()?,
            verification_path: r.words(VERIFICATION_MERKLE_DEPTH)?,
            verification_directions: r.bits(VERIFICATION_MERKLE_DEPTH)?,
        }),
        PublicInputs::Transfer(public) => Witness::Transfer(TransferWitness {
            public,
            addresses: r.words(params.max_friends_len)?,
            passphrase: r.word()?,
            threshold: r.word()?,
            nonce: r.word()?,
        }),
    };
    r.finish()?;
    Ok(witness)
}
