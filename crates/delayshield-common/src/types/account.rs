//! Account and signer identities

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

/// Identity of a buyer, underwriter, administrator or registry
///
/// Opaque to the core: whatever the surrounding system uses as an
/// address (hex string, DID, username) is accepted as long as it is
/// compared byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes fed into signed-message and policy-id hashes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Authorized quote signer, identified by its Ed25519 public key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignerId(pub [u8; 32]);

impl SignerId {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for SignerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_display_roundtrip() {
        let account = AccountId::from("0xbuyer");
        assert_eq!(account.to_string(), "0xbuyer");
        assert_eq!(account.as_bytes(), b"0xbuyer");
    }

    #[test]
    fn test_signer_hex() {
        let signer = SignerId([0xab; 32]);
        assert!(signer.to_string().starts_with("0xabab"));
        assert_eq!(signer.to_hex().len(), 64);
    }
}
