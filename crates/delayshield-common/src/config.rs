//! DelayShield configuration
//!
//! Defaults carry the documented protocol constants. `load()` reads an
//! optional `.env` file and then `DELAYSHIELD_*` environment variables.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{key} out of range: {reason}")]
    OutOfRange { key: String, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelayShieldConfig {
    pub pool: PoolSettings,
    pub underwriting: UnderwritingSettings,
    pub oracle: OracleSettings,
}

/// Risk pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Share of staked capital that may be locked against policies, in (0, 1]
    pub collateral_factor: Decimal,
    /// Minimum hold after the last deposit before a withdrawal is paid
    pub unstake_lock_secs: i64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            collateral_factor: Decimal::ONE,
            unstake_lock_secs: crate::UNSTAKE_LOCK_SECS,
        }
    }
}

/// Policy underwriting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnderwritingSettings {
    /// Applications must be made at least this long before departure
    pub min_lead_time_secs: i64,
    /// Delays at or below this many minutes count as on time
    pub delay_threshold_minutes: i64,
    /// Token amount paid per payoff-table point (token decimal scaling)
    pub payout_unit: Decimal,
    /// Provider value meaning "cancelled"
    pub cancelled_sentinel: i64,
    /// Largest payoff a single policy may carry
    pub max_payoff: Option<Decimal>,
}

impl Default for UnderwritingSettings {
    fn default() -> Self {
        Self {
            min_lead_time_secs: crate::MIN_LEAD_TIME_SECS,
            delay_threshold_minutes: 0,
            payout_unit: Decimal::ONE,
            cancelled_sentinel: crate::CANCELLED_SENTINEL,
            max_payoff: None,
        }
    }
}

/// Flight-status provider job settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleSettings {
    /// Request URL prefix; flight number and date are appended
    pub endpoint_template: String,
    /// JSON path of the delay value in the provider response
    pub json_path: String,
    /// Multiplier the provider applies before returning an integer
    pub result_multiplier: i64,
    /// Provider job identifier
    pub job_id: String,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            endpoint_template:
                "https://api.flightstats.com/flex/flightstatus/rest/v2/json/flight/status/"
                    .to_string(),
            json_path: "flightStatuses.0.delays.arrivalGateDelayMinutes".to_string(),
            result_multiplier: 1,
            job_id: "flight-delay-minutes".to_string(),
        }
    }
}

impl DelayShieldConfig {
    /// Load configuration from environment and `.env`
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();

        // Pool settings
        if let Some(v) = read_env("DELAYSHIELD_POOL_COLLATERAL_FACTOR")? {
            cfg.pool.collateral_factor = v;
        }
        if let Some(v) = read_env("DELAYSHIELD_POOL_UNSTAKE_LOCK_SECS")? {
            cfg.pool.unstake_lock_secs = v;
        }

        // Underwriting settings
        if let Some(v) = read_env("DELAYSHIELD_MIN_LEAD_TIME_SECS")? {
            cfg.underwriting.min_lead_time_secs = v;
        }
        if let Some(v) = read_env("DELAYSHIELD_DELAY_THRESHOLD_MINUTES")? {
            cfg.underwriting.delay_threshold_minutes = v;
        }
        if let Some(v) = read_env("DELAYSHIELD_PAYOUT_UNIT")? {
            cfg.underwriting.payout_unit = v;
        }
        if let Some(v) = read_env::<Decimal>("DELAYSHIELD_MAX_PAYOFF")? {
            cfg.underwriting.max_payoff = Some(v);
        }

        // Oracle settings
        if let Ok(v) = std::env::var("DELAYSHIELD_ORACLE_ENDPOINT") {
            cfg.oracle.endpoint_template = v;
        }
        if let Ok(v) = std::env::var("DELAYSHIELD_ORACLE_JSON_PATH") {
            cfg.oracle.json_path = v;
        }
        if let Some(v) = read_env("DELAYSHIELD_ORACLE_MULTIPLIER")? {
            cfg.oracle.result_multiplier = v;
        }
        if let Ok(v) = std::env::var("DELAYSHIELD_ORACLE_JOB_ID") {
            cfg.oracle.job_id = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_collateral_factor(self.pool.collateral_factor)?;

        if self.pool.unstake_lock_secs < 0 {
            return Err(out_of_range("pool.unstake_lock_secs", "must not be negative"));
        }
        if self.underwriting.min_lead_time_secs < 0 {
            return Err(out_of_range("underwriting.min_lead_time_secs", "must not be negative"));
        }
        if self.underwriting.delay_threshold_minutes < 0 {
            return Err(out_of_range(
                "underwriting.delay_threshold_minutes",
                "must not be negative",
            ));
        }
        if self.underwriting.payout_unit <= Decimal::ZERO {
            return Err(out_of_range("underwriting.payout_unit", "must be positive"));
        }
        if matches!(self.underwriting.max_payoff, Some(max) if max <= Decimal::ZERO) {
            return Err(out_of_range("underwriting.max_payoff", "must be positive"));
        }
        self.oracle.validate()
    }
}

impl OracleSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_template.trim().is_empty() {
            return Err(out_of_range("oracle.endpoint_template", "must not be empty"));
        }
        if self.json_path.trim().is_empty() {
            return Err(out_of_range("oracle.json_path", "must not be empty"));
        }
        if self.result_multiplier <= 0 {
            return Err(out_of_range("oracle.result_multiplier", "must be positive"));
        }
        Ok(())
    }
}

/// Collateral factor must lie in (0, 1]
pub fn validate_collateral_factor(factor: Decimal) -> Result<(), ConfigError> {
    if factor <= Decimal::ZERO || factor > Decimal::ONE {
        return Err(out_of_range(
            "pool.collateral_factor",
            &format!("{} is not in (0, 1]", factor),
        ));
    }
    Ok(())
}

fn out_of_range(key: &str, reason: &str) -> ConfigError {
    ConfigError::OutOfRange {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn read_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}
