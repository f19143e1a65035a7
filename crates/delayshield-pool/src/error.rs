//! Risk pool errors

use delayshield_common::{AccessError, AccountId, Classify, ConfigError, ErrorClass};
use rust_decimal::Decimal;
use thiserror::Error;

/// Ledger integrity violations
///
/// None of these can happen while the pool's invariants hold. Seeing one
/// means an upstream bug; the pool halts instead of guessing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InsolvencyError {
    #[error("Pool funds {available} cannot cover payout {required}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Release of {required} exceeds locked balance {locked}")]
    LockUnderflow { required: Decimal, locked: Decimal },

    #[error("Release of premium {required} exceeds active premiums {active}")]
    PremiumUnderflow { required: Decimal, active: Decimal },

    #[error("Claim loss {loss} exceeds staked capital {staked}")]
    StakeShortfall { loss: Decimal, staked: Decimal },
}

/// Risk pool operation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoolError {
    #[error("Insufficient pool capacity: required {required}, available {available}")]
    InsufficientCapacity { required: Decimal, available: Decimal },

    #[error("Insufficient unlocked stake: requested {requested}, unlocked {unlocked}")]
    InsufficientUnlocked { requested: Decimal, unlocked: Decimal },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Payout {payout} exceeds reserved payoff {payoff}")]
    PayoutExceedsReservation { payout: Decimal, payoff: Decimal },

    #[error("Unknown underwriter: {0}")]
    UnknownUnderwriter(AccountId),

    #[error("Pool halted after integrity fault: {reason}")]
    Halted { reason: String },

    #[error("Ledger integrity violation: {0}")]
    Insolvency(#[from] InsolvencyError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Amount overflow")]
    Overflow,
}

impl Classify for PoolError {
    fn class(&self) -> ErrorClass {
        match self {
            PoolError::InsufficientCapacity { .. } => ErrorClass::Capacity,
            PoolError::InsufficientUnlocked { .. } => ErrorClass::Capacity,
            PoolError::Halted { .. } | PoolError::Insolvency(_) => ErrorClass::Insolvency,
            PoolError::Access(_) => ErrorClass::Access,
            PoolError::InvalidAmount
            | PoolError::PayoutExceedsReservation { .. }
            | PoolError::UnknownUnderwriter(_)
            | PoolError::Config(_)
            | PoolError::Overflow => ErrorClass::Input,
        }
    }
}
