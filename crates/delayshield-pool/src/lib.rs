//! # DelayShield Pool
//!
//! Risk pool ledger for DelayShield: underwriters stake capital, the policy
//! manager reserves part of it against every sold policy, and settlements
//! either release the reservation or pay the claim out of pool funds.
//!
//! ## Accounting
//!
//! ```text
//! availableCapacity = totalStakingBalance × collateralFactor − lockedBalance
//! lockedRatio       = lockedBalance / totalStakingBalance
//! funds             = Σ staked + activePremiums + retainedPremiums + withdrawalEscrow
//! ```
//!
//! An underwriter may withdraw at most `(1 − lockedRatio) × staked`, after a
//! 7-day hold from their last deposit. Withdrawals that cannot be paid at
//! once wait in a FIFO queue and are fulfilled as capital unlocks.
//!
//! A broken invariant (for example a payout the pool cannot cover) halts
//! every mutating operation until the owner resumes the pool.

pub mod error;
pub mod ledger;
pub mod position;
pub mod state;
pub mod withdrawal;

pub use error::{InsolvencyError, PoolError};
pub use ledger::{Disbursement, DisbursementReason, PoolSnapshot, RiskPool, UnstakeOutcome};
pub use position::{UnderwriterPosition, UnstakeRequest};
pub use state::{PoolState, SHARE_SCALE};
pub use withdrawal::{QueueEntry, WithdrawalQueue};
