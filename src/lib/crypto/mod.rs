pub mod accumulator;
pub mod encryption;
pub mod poseidon;
pub mod sampler;
