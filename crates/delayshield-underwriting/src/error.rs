//! Underwriting errors

use delayshield_common::{
    AccessError, AccountId, AuthError, Classify, ConfigError, ErrorClass, PolicyId, RequestId,
    Timestamp, TokenId,
};
use delayshield_pool::PoolError;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::policy::PolicyStatus;

/// Oracle transport failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("Oracle channel closed")]
    ChannelClosed,

    #[error("Oracle rejected request: {0}")]
    Rejected(String),
}

impl Classify for OracleError {
    fn class(&self) -> ErrorClass {
        ErrorClass::External
    }
}

/// Ownership registry failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Mint failed: {0}")]
    MintFailed(String),

    #[error("Unknown token {0}")]
    UnknownToken(TokenId),

    #[error("Token {token} is held by {holder}, not {claimed}")]
    NotHolder {
        token: TokenId,
        holder: AccountId,
        claimed: AccountId,
    },

    #[error("Registry is not attached to a policy manager")]
    Detached,

    #[error(transparent)]
    Ownership(#[from] OwnershipError),
}

impl Classify for RegistryError {
    fn class(&self) -> ErrorClass {
        match self {
            RegistryError::Ownership(e) => e.class(),
            RegistryError::NotHolder { .. } => ErrorClass::State,
            _ => ErrorClass::External,
        }
    }
}

/// Application intake errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApplicationError {
    #[error("Departure {departure} is earlier than {earliest}")]
    TooLate {
        departure: Timestamp,
        earliest: Timestamp,
    },

    #[error("Unauthorized application: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Insufficient pool capacity for {policy_id}: required {required}, available {available}")]
    InsufficientCapacity {
        policy_id: PolicyId,
        required: Decimal,
        available: Decimal,
    },

    #[error("Payoff {payoff} exceeds maximum {max}")]
    PayoffTooLarge { payoff: Decimal, max: Decimal },

    #[error("Invalid application: {0}")]
    InvalidInput(String),

    #[error("Risk pool error: {0}")]
    Pool(#[from] PoolError),
}

impl Classify for ApplicationError {
    fn class(&self) -> ErrorClass {
        match self {
            ApplicationError::TooLate { .. } => ErrorClass::Timing,
            ApplicationError::Unauthorized(_) => ErrorClass::Auth,
            ApplicationError::InsufficientCapacity { .. } => ErrorClass::Capacity,
            ApplicationError::PayoffTooLarge { .. } | ApplicationError::InvalidInput(_) => {
                ErrorClass::Input
            }
            ApplicationError::Pool(e) => e.class(),
        }
    }
}

/// Claim-trigger errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClaimError {
    #[error("Unknown policy order {0}")]
    UnknownPolicy(u64),

    #[error("Policy {order} lands at {landing}, now {now}")]
    TooEarly {
        order: u64,
        landing: Timestamp,
        now: Timestamp,
    },

    #[error("Flight number {given:?} does not match {stored:?}")]
    Mismatch { given: String, stored: String },

    #[error("Claim already requested or settled for policy {order} ({status})")]
    AlreadySettled { order: u64, status: PolicyStatus },

    #[error("Unauthorized claim request: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Caller {caller} may not trigger claims")]
    NotPermitted { caller: AccountId },

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("Oracle dispatch failed: {0}")]
    Oracle(#[from] OracleError),
}

impl Classify for ClaimError {
    fn class(&self) -> ErrorClass {
        match self {
            ClaimError::UnknownPolicy(_) => ErrorClass::Input,
            ClaimError::TooEarly { .. } => ErrorClass::Timing,
            ClaimError::Mismatch { .. } | ClaimError::AlreadySettled { .. } => ErrorClass::State,
            ClaimError::Unauthorized(_) => ErrorClass::Auth,
            ClaimError::NotPermitted { .. } | ClaimError::Access(_) => ErrorClass::Access,
            ClaimError::Oracle(e) => e.class(),
        }
    }
}

/// Oracle callback errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettlementError {
    #[error("Unknown oracle request {0}")]
    UnknownRequest(RequestId),

    #[error("Oracle request {0} already fulfilled")]
    DuplicateFulfillment(RequestId),

    #[error("Settlement blocked by risk pool: {0}")]
    Pool(#[from] PoolError),
}

impl Classify for SettlementError {
    fn class(&self) -> ErrorClass {
        match self {
            SettlementError::UnknownRequest(_) | SettlementError::DuplicateFulfillment(_) => {
                ErrorClass::Callback
            }
            SettlementError::Pool(e) => e.class(),
        }
    }
}

/// Ownership hook errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OwnershipError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("Unknown ownership token {0}")]
    UnknownToken(TokenId),

    #[error("Token {token}: stated owner {stated} does not match buyer of record {recorded}")]
    OwnerMismatch {
        token: TokenId,
        stated: AccountId,
        recorded: AccountId,
    },
}

impl Classify for OwnershipError {
    fn class(&self) -> ErrorClass {
        match self {
            OwnershipError::Access(_) => ErrorClass::Access,
            OwnershipError::UnknownToken(_) => ErrorClass::Input,
            OwnershipError::OwnerMismatch { .. } => ErrorClass::State,
        }
    }
}

/// Administrative operation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdminError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unknown policy order {0}")]
    UnknownPolicy(u64),

    #[error("Policy {order} is {status}; nothing to mint")]
    NotMintable { order: u64, status: PolicyStatus },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl Classify for AdminError {
    fn class(&self) -> ErrorClass {
        match self {
            AdminError::Access(_) => ErrorClass::Access,
            AdminError::Config(_) | AdminError::UnknownPolicy(_) => ErrorClass::Input,
            AdminError::NotMintable { .. } => ErrorClass::State,
            AdminError::Registry(e) => e.class(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delayshield_pool::InsolvencyError;
    use rust_decimal_macros::dec;

    #[test]
    fn test_capacity_is_recoverable() {
        let err = ApplicationError::InsufficientCapacity {
            policy_id: PolicyId([0u8; 32]),
            required: dec!(500),
            available: dec!(100),
        };
        assert_eq!(err.class(), ErrorClass::Capacity);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_pool_fault_is_fatal_through_settlement() {
        let err = SettlementError::from(PoolError::from(InsolvencyError::LockUnderflow {
            required: dec!(10),
            locked: dec!(0),
        }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_callback_errors_are_not_fatal() {
        let err = SettlementError::DuplicateFulfillment(RequestId::new());
        assert_eq!(err.class(), ErrorClass::Callback);
        assert!(!err.is_fatal());
    }
}
