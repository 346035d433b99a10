pub mod json_keystore;
pub mod memory_ledger;
pub mod proof_adapter;
pub mod reference_backend;
pub mod verification_tree;
