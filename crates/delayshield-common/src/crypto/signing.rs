//! Signed quotes and claim triggers
//!
//! Premiums are priced off-system. The quoting service signs the fields it
//! priced, and the core only accepts an application whose signature comes
//! from an authorized signer. Claim triggers use the same mechanism under a
//! different domain so a quote signature can never be replayed as a claim
//! trigger (or the other way round).
//!
//! Wire format of a signature: `public_key (32) || ed25519_signature (64)`.
//! The signer is "recovered" by verifying the signature against the
//! embedded key and then looking that key up in the signer set.

use std::collections::BTreeSet;
use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::{Classify, ErrorClass};
use crate::security::access::AccessControl;
use crate::security::events::{EventBus, InsuranceEvent};
use crate::types::account::{AccountId, SignerId};
use crate::types::Timestamp;

/// Key-derivation context for policy applications
pub const APPLICATION_DOMAIN: &str = "delayshield 2024-01 policy application v1";

/// Key-derivation context for claim triggers
pub const CLAIM_DOMAIN: &str = "delayshield 2024-01 claim trigger v1";

/// Length of an encoded signature (public key + signature)
pub const SIGNATURE_LEN: usize = 32 + 64;

/// Signature verification errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("Signer {signer} is not authorized")]
    UnknownSigner { signer: SignerId },

    #[error("Signature expired: deadline {deadline} < now {now}")]
    Expired { deadline: Timestamp, now: Timestamp },

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Signature does not match the signed fields")]
    InvalidSignature,

    #[error("Signer {0} is already authorized")]
    SignerAlreadyAuthorized(SignerId),

    #[error("Signer {0} is not in the signer set")]
    SignerNotAuthorized(SignerId),
}

impl Classify for AuthError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Auth
    }
}

/// Fields priced and signed by the quoting service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationMessage {
    pub flight_number: String,
    pub buyer: AccountId,
    pub premium: Decimal,
    pub deadline: Timestamp,
}

/// Fields authorizing a claim trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimMessage {
    pub policy_order: u64,
    pub requester: AccountId,
    pub deadline: Timestamp,
}

/// A message that can be signed under one of the two domains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum SignableFields {
    Application(ApplicationMessage),
    Claim(ClaimMessage),
}

impl SignableFields {
    /// Key-derivation context for this message's domain
    pub fn domain(&self) -> &'static str {
        match self {
            SignableFields::Application(_) => APPLICATION_DOMAIN,
            SignableFields::Claim(_) => CLAIM_DOMAIN,
        }
    }

    pub fn deadline(&self) -> Timestamp {
        match self {
            SignableFields::Application(m) => m.deadline,
            SignableFields::Claim(m) => m.deadline,
        }
    }

    /// Domain-separated hash of the exact field set
    ///
    /// Variable-length fields are length-prefixed; decimals are hashed in
    /// normalized form so `12.50` and `12.5` sign identically.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_derive_key(self.domain());
        match self {
            SignableFields::Application(m) => {
                put_bytes(&mut hasher, m.flight_number.as_bytes());
                put_bytes(&mut hasher, m.buyer.as_bytes());
                put_bytes(&mut hasher, m.premium.normalize().to_string().as_bytes());
                hasher.update(&m.deadline.to_le_bytes());
            }
            SignableFields::Claim(m) => {
                hasher.update(&m.policy_order.to_le_bytes());
                put_bytes(&mut hasher, m.requester.as_bytes());
                hasher.update(&m.deadline.to_le_bytes());
            }
        }
        *hasher.finalize().as_bytes()
    }
}

fn put_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Signing side, used by the quoting service and by tests
pub struct QuoteSigner {
    key: SigningKey,
}

impl QuoteSigner {
    /// Generate a fresh signing key
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Restore a signer from its 32-byte secret
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(secret),
        }
    }

    pub fn signer_id(&self) -> SignerId {
        SignerId::from_verifying_key(&self.key.verifying_key())
    }

    /// Sign a message, producing the wire-format signature
    pub fn sign(&self, message: &SignableFields) -> Vec<u8> {
        let signature = self.key.sign(&message.digest());
        let mut out = Vec::with_capacity(SIGNATURE_LEN);
        out.extend_from_slice(self.key.verifying_key().as_bytes());
        out.extend_from_slice(&signature.to_bytes());
        out
    }
}

/// Verifies quote and claim-trigger signatures against the signer set
pub struct SignatureAuthorizer {
    signers: RwLock<BTreeSet<SignerId>>,
    access: Arc<AccessControl>,
    events: Arc<EventBus>,
}

impl SignatureAuthorizer {
    pub fn new(access: Arc<AccessControl>, events: Arc<EventBus>) -> Self {
        Self {
            signers: RwLock::new(BTreeSet::new()),
            access,
            events,
        }
    }

    /// Verify `signature` over `message` and return the authorized signer
    ///
    /// The deadline is checked first, so an expired quote is reported as
    /// expired even when its signature is also bad.
    pub fn verify(
        &self,
        message: &SignableFields,
        signature: &[u8],
        now: Timestamp,
    ) -> Result<SignerId, AuthError> {
        let deadline = message.deadline();
        if now > deadline {
            return Err(AuthError::Expired { deadline, now });
        }

        let (key, sig) = decode_signature(signature)?;
        key.verify_strict(&message.digest(), &sig)
            .map_err(|_| AuthError::InvalidSignature)?;

        let signer = SignerId::from_verifying_key(&key);
        if !self.signers.read().contains(&signer) {
            warn!(signer = %signer, domain = message.domain(), "Signature from unknown signer");
            return Err(AuthError::UnknownSigner { signer });
        }

        debug!(signer = %signer, domain = message.domain(), "Signature verified");
        Ok(signer)
    }

    /// Authorize a new signer (owner only)
    #[instrument(skip(self))]
    pub fn add_signer(&self, caller: &AccountId, signer: SignerId) -> crate::Result<()> {
        self.access.require_owner(caller)?;

        if !self.signers.write().insert(signer) {
            return Err(AuthError::SignerAlreadyAuthorized(signer).into());
        }

        info!(signer = %signer, "Signer added");
        self.events.publish(InsuranceEvent::SignerAdded { signer });
        Ok(())
    }

    /// Revoke a signer (owner only)
    #[instrument(skip(self))]
    pub fn remove_signer(&self, caller: &AccountId, signer: SignerId) -> crate::Result<()> {
        self.access.require_owner(caller)?;

        if !self.signers.write().remove(&signer) {
            return Err(AuthError::SignerNotAuthorized(signer).into());
        }

        info!(signer = %signer, "Signer removed");
        self.events.publish(InsuranceEvent::SignerRemoved { signer });
        Ok(())
    }

    pub fn is_signer(&self, signer: &SignerId) -> bool {
        self.signers.read().contains(signer)
    }

    pub fn signers(&self) -> Vec<SignerId> {
        self.signers.read().iter().copied().collect()
    }
}

fn decode_signature(bytes: &[u8]) -> Result<(VerifyingKey, Signature), AuthError> {
    if bytes.len() != SIGNATURE_LEN {
        return Err(AuthError::MalformedSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LEN,
            bytes.len()
        )));
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&bytes[..32]);
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| AuthError::MalformedSignature("invalid public key".into()))?;

    let sig = Signature::from_slice(&bytes[32..])
        .map_err(|e| AuthError::MalformedSignature(e.to_string()))?;

    Ok((key, sig))
}
