pub mod keystore;
pub mod ledger;
pub mod prover;
