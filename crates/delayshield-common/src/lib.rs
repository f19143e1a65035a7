//! # DelayShield Common
//!
//! Shared types, signatures, access control and notifications for the
//! DelayShield parametric flight-delay insurance core.
//!
//! ## Core Types
//!
//! - [`AccountId`]: buyer, underwriter and administrator identity
//! - [`SignerId`]: Ed25519 public key of an authorized quote signer
//! - [`PolicyId`]: content-derived policy identifier
//! - [`Clock`]: the single logical clock shared by pool and policy manager
//!
//! ## Crypto
//!
//! - [`crypto::signing`]: domain-separated quote and claim-trigger signatures
//!
//! ## Security
//!
//! - [`security::access`]: privileged-caller checks
//! - [`security::events`]: typed notifications and their sinks

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod security;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, DelayShieldConfig, OracleSettings, PoolSettings, UnderwritingSettings};
pub use crypto::signing::{
    ApplicationMessage, AuthError, ClaimMessage, QuoteSigner, SignableFields, SignatureAuthorizer,
};
pub use error::{Classify, DelayShieldError, ErrorClass, Result};
pub use security::access::{AccessControl, AccessError};
pub use security::events::{EventBus, EventSink, InsuranceEvent, MemoryEventSink, TracingEventSink};
pub use types::{
    account::{AccountId, SignerId},
    ids::{PolicyId, RequestId, TokenId},
    Amount, Timestamp,
};

/// DelayShield version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seconds in one day
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Minimum hold between the last deposit and a withdrawal (7 days)
pub const UNSTAKE_LOCK_SECS: i64 = 7 * SECONDS_PER_DAY;

/// Minimum time between application and scheduled departure (24 hours)
pub const MIN_LEAD_TIME_SECS: i64 = 24 * 60 * 60;

/// Provider sentinel for a cancelled flight
pub const CANCELLED_SENTINEL: i64 = 400;

/// Provider value for an on-time flight
pub const ON_TIME: i64 = 0;
