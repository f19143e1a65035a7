//! Cryptographic primitives for DelayShield
//!
//! - Domain-separated hashing of quote and claim-trigger messages (BLAKE3)
//! - Ed25519 signature verification against the authorized signer set

pub mod signing;

pub use signing::{QuoteSigner, SignatureAuthorizer, SIGNATURE_LEN};
