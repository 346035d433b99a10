pub mod adapters;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod orchestrator;
pub mod ports;
