//! Cryptographic primitives for Ferrite Coin

pub mod keypair;
pub mod signature;

pub use keypair::FerriteKeyPair;
pub use signature::{sign_message, verify_detached, verify_signature};
