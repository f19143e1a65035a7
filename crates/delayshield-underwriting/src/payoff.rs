//! Delay-to-payout schedule
//!
//! ```text
//! delay ≤ threshold            → expired, nothing paid
//! 0   < delay ≤ 60             → delay
//! 60  < delay ≤ 120            → 60  + (delay − 60)  × 2
//! 120 < delay ≤ 240            → 180 + (delay − 120) × 3
//! delay == cancelled sentinel  → full stored payoff
//! anything else                → expired
//! ```
//!
//! Table points are scaled by the payout unit and capped at the policy's
//! stored payoff.

use delayshield_common::{UnderwritingSettings, ON_TIME};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a settled policy pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    /// No payout; the reservation is released
    Expire,
    /// Pay this amount out of the reservation
    Payout(Decimal),
}

/// Payout schedule parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoffSchedule {
    /// Delays at or below this many minutes count as on time
    pub delay_threshold_minutes: i64,
    /// Token amount per table point
    pub payout_unit: Decimal,
    /// Provider value for a cancelled flight
    pub cancelled_sentinel: i64,
}

impl Default for PayoffSchedule {
    fn default() -> Self {
        Self::from(&UnderwritingSettings::default())
    }
}

impl From<&UnderwritingSettings> for PayoffSchedule {
    fn from(settings: &UnderwritingSettings) -> Self {
        Self {
            delay_threshold_minutes: settings.delay_threshold_minutes,
            payout_unit: settings.payout_unit,
            cancelled_sentinel: settings.cancelled_sentinel,
        }
    }
}

impl PayoffSchedule {
    /// Table points for a delay, before scaling and capping
    pub fn points(&self, delay_minutes: i64) -> Option<i64> {
        if delay_minutes <= ON_TIME || delay_minutes <= self.delay_threshold_minutes {
            return None;
        }
        match delay_minutes {
            1..=60 => Some(delay_minutes),
            61..=120 => Some(60 + (delay_minutes - 60) * 2),
            121..=240 => Some(180 + (delay_minutes - 120) * 3),
            _ => None,
        }
    }

    /// Settle a policy with maximum payoff `payoff`
    pub fn settle(&self, delay_minutes: i64, payoff: Decimal) -> Settlement {
        if delay_minutes == self.cancelled_sentinel {
            return Settlement::Payout(payoff);
        }

        match self.points(delay_minutes) {
            Some(points) => {
                let amount = (Decimal::from(points) * self.payout_unit).min(payoff);
                if amount > Decimal::ZERO {
                    Settlement::Payout(amount)
                } else {
                    Settlement::Expire
                }
            }
            None => Settlement::Expire,
        }
    }
}
