//! Error types for DelayShield
//!
//! Every component owns a domain-specific error enum. All of them can be
//! sorted into one [`ErrorClass`] so callers can react to the category
//! (retry, show to the buyer, page an operator) without matching every
//! variant.

use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::signing::AuthError;
use crate::security::access::AccessError;

/// Result type alias using DelayShieldError
pub type Result<T> = std::result::Result<T, DelayShieldError>;

/// Error category shared by every DelayShield error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad, expired or malformed signature
    Auth,
    /// Caller lacks the privilege for an administrative operation
    Access,
    /// Pool cannot take on more exposure; the policy is recorded as declined
    Capacity,
    /// Too close to departure, claim before landing
    Timing,
    /// Duplicate settlement, flight mismatch, terminal policy
    State,
    /// Ledger invariant broken; mutation halts until an administrator acts
    Insolvency,
    /// Unknown or already consumed oracle callback; resolved as a no-op
    Callback,
    /// Caller supplied an out-of-range value
    Input,
    /// Oracle or registry collaborator failed
    External,
}

/// Maps an error onto the shared taxonomy
pub trait Classify {
    fn class(&self) -> ErrorClass;

    /// Integrity violations only; everything else is recoverable by the caller
    fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Insolvency
    }
}

/// Unified error type for the shared layer
#[derive(Debug, Error)]
pub enum DelayShieldError {
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Classify for DelayShieldError {
    fn class(&self) -> ErrorClass {
        match self {
            DelayShieldError::Auth(e) => e.class(),
            DelayShieldError::Access(e) => e.class(),
            DelayShieldError::Config(_) => ErrorClass::Input,
            DelayShieldError::Serialization(_) | DelayShieldError::Internal(_) => {
                ErrorClass::External
            }
        }
    }
}

impl From<serde_json::Error> for DelayShieldError {
    fn from(err: serde_json::Error) -> Self {
        DelayShieldError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for DelayShieldError {
    fn from(err: anyhow::Error) -> Self {
        DelayShieldError::Internal(err.to_string())
    }
}
