pub mod commitment;
pub mod encoding;
pub mod friends;
pub mod invitation;
pub mod keys;
pub mod merkle;
pub mod params;
pub mod records;
pub mod validation;
pub mod witness;
