//! Policy, token and oracle-request identifiers

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;
use super::Timestamp;

/// Content-derived policy identifier
///
/// Derived from buyer, product, departure date and the book's sequence
/// number, so two otherwise identical applications never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub [u8; 32]);

impl PolicyId {
    /// Derive a policy id
    pub fn derive(
        buyer: &AccountId,
        product_id: &str,
        departure_date: Timestamp,
        sequence: u64,
    ) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("delayshield 2024-01 policy id v1");
        hasher.update(&(buyer.as_bytes().len() as u64).to_le_bytes());
        hasher.update(buyer.as_bytes());
        hasher.update(&(product_id.len() as u64).to_le_bytes());
        hasher.update(product_id.as_bytes());
        hasher.update(&departure_date.to_le_bytes());
        hasher.update(&sequence.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// Ownership token minted by the external registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u64);

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Oracle request identifier (UUIDv7, time-ordered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
