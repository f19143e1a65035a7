//! Core data types for DelayShield

pub mod account;
pub mod ids;

/// Token amounts (premiums, payoffs, stakes)
pub type Amount = rust_decimal::Decimal;

/// Logical time in Unix seconds
pub type Timestamp = i64;
