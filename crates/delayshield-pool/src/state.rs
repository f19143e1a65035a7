//! Pool-wide balances and the figures derived from them

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{InsolvencyError, PoolError};

/// Decimal places kept when splitting amounts pro rata
pub const SHARE_SCALE: u32 = 12;

/// Pool balances
///
/// Owned by exactly one [`RiskPool`](crate::RiskPool); there is no
/// process-wide instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    /// Sum of every underwriter's `staked`
    pub total_staking_balance: Decimal,
    /// Maximum payoffs reserved by sold, unsettled policies
    pub locked_balance: Decimal,
    /// Premiums of sold, unsettled policies
    pub active_premiums: Decimal,
    /// Premiums earned by settled policies
    pub retained_premiums: Decimal,
    /// Fulfilled withdrawals waiting for their request to complete
    pub withdrawal_escrow: Decimal,
    /// Share of staked capital that may be locked, in (0, 1]
    pub collateral_factor: Decimal,
}

impl PoolState {
    pub fn new(collateral_factor: Decimal) -> Self {
        Self {
            total_staking_balance: Decimal::ZERO,
            locked_balance: Decimal::ZERO,
            active_premiums: Decimal::ZERO,
            retained_premiums: Decimal::ZERO,
            withdrawal_escrow: Decimal::ZERO,
            collateral_factor,
        }
    }

    /// `totalStakingBalance × collateralFactor`
    #[inline]
    pub fn capacity_ceiling(&self) -> Decimal {
        self.total_staking_balance * self.collateral_factor
    }

    /// Headroom for new reservations
    ///
    /// Saturates at zero: lowering the collateral factor never invalidates
    /// reservations that already exist, it only blocks new ones.
    pub fn available_capacity(&self) -> Decimal {
        (self.capacity_ceiling() - self.locked_balance).max(Decimal::ZERO)
    }

    /// Fraction of staked capital currently reserved (0 for an empty pool)
    pub fn locked_ratio(&self) -> Decimal {
        if self.total_staking_balance.is_zero() {
            Decimal::ZERO
        } else {
            self.locked_balance / self.total_staking_balance
        }
    }

    /// `(1 − lockedRatio) × staked`, rounded down to [`SHARE_SCALE`]
    ///
    /// Multiplies before dividing so a sole underwriter's share comes out
    /// exact.
    pub fn unlocked_share(&self, staked: Decimal) -> Decimal {
        let total = self.total_staking_balance;
        if total <= Decimal::ZERO || self.locked_balance <= Decimal::ZERO {
            return staked.max(Decimal::ZERO);
        }

        let free = (total - self.locked_balance).max(Decimal::ZERO);
        let share = staked
            .checked_mul(free)
            .and_then(|v| v.checked_div(total))
            .unwrap_or_else(|| (Decimal::ONE - self.locked_ratio()) * staked);
        share
            .round_dp_with_strategy(SHARE_SCALE, RoundingStrategy::ToZero)
            .max(Decimal::ZERO)
    }

    /// Collateral held by the pool
    pub fn funds(&self) -> Decimal {
        self.total_staking_balance
            + self.active_premiums
            + self.retained_premiums
            + self.withdrawal_escrow
    }

    /// Funds that can leave the pool without touching a reservation
    pub fn free_liquidity(&self) -> Decimal {
        (self.funds() - self.locked_balance - self.active_premiums - self.withdrawal_escrow)
            .max(Decimal::ZERO)
    }

    /// Funds that may be used to pay a claim (escrow belongs to underwriters)
    pub fn claimable_funds(&self) -> Decimal {
        self.funds() - self.withdrawal_escrow
    }

    /// Stake that can leave without pushing reservations and active
    /// premiums over the capacity ceiling
    pub fn withdrawable_headroom(&self) -> Decimal {
        if self.collateral_factor <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let committed = (self.locked_balance + self.active_premiums) / self.collateral_factor;
        (self.total_staking_balance - committed).max(Decimal::ZERO)
    }

    /// Upper bound on what a withdrawal may take right now
    pub fn withdrawal_liquidity(&self) -> Decimal {
        self.free_liquidity().min(self.withdrawable_headroom())
    }

    /// Check that a reservation of `payoff` plus `premium` fits
    ///
    /// Three bounds apply: the payoff must fit in the available capacity,
    /// the locked balance may never exceed staked capital, and locked
    /// payoffs plus active premiums must stay under the capacity ceiling.
    pub fn ensure_can_reserve(&self, premium: Decimal, payoff: Decimal) -> Result<(), PoolError> {
        let available = self.available_capacity();
        let insufficient = || PoolError::InsufficientCapacity {
            required: payoff,
            available,
        };

        if available < payoff {
            return Err(insufficient());
        }
        if self.locked_balance + payoff > self.total_staking_balance {
            return Err(insufficient());
        }
        if self.active_premiums + premium + self.locked_balance + payoff > self.capacity_ceiling() {
            return Err(insufficient());
        }
        Ok(())
    }

    /// Check that a reservation can be released
    pub fn ensure_can_release(&self, premium: Decimal, payoff: Decimal) -> Result<(), InsolvencyError> {
        if self.locked_balance < payoff {
            return Err(InsolvencyError::LockUnderflow {
                required: payoff,
                locked: self.locked_balance,
            });
        }
        if self.active_premiums < premium {
            return Err(InsolvencyError::PremiumUnderflow {
                required: premium,
                active: self.active_premiums,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pool(total: Decimal, locked: Decimal) -> PoolState {
        let mut state = PoolState::new(Decimal::ONE);
        state.total_staking_balance = total;
        state.locked_balance = locked;
        state
    }

    #[test]
    fn test_empty_pool() {
        let state = PoolState::new(Decimal::ONE);
        assert_eq!(state.locked_ratio(), Decimal::ZERO);
        assert_eq!(state.available_capacity(), Decimal::ZERO);
        assert_eq!(state.funds(), Decimal::ZERO);
    }

    #[test]
    fn test_derived_figures() {
        let state = pool(dec!(1000), dec!(200));
        assert_eq!(state.locked_ratio(), dec!(0.2));
        assert_eq!(state.available_capacity(), dec!(800));
        assert_eq!(state.free_liquidity(), dec!(800));
    }

    #[test]
    fn test_unlocked_share() {
        let state = pool(dec!(100), dec!(20));
        assert_eq!(state.unlocked_share(dec!(100)), dec!(80));

        let state = pool(dec!(3), dec!(1));
        assert_eq!(state.unlocked_share(dec!(3)), dec!(2));
        assert_eq!(state.unlocked_share(dec!(1)), dec!(0.666666666666));

        // Nothing locked: the whole stake, exactly
        let state = pool(dec!(3.000000000001), dec!(0));
        assert_eq!(state.unlocked_share(dec!(1.333333333334)), dec!(1.333333333334));
    }

    #[test]
    fn test_capacity_saturates_after_factor_cut() {
        let mut state = pool(dec!(1000), dec!(700));
        state.collateral_factor = dec!(0.5);
        assert_eq!(state.available_capacity(), Decimal::ZERO);
        assert!(state.ensure_can_reserve(dec!(1), dec!(1)).is_err());
    }

    #[test]
    fn test_premiums_count_against_ceiling() {
        let mut state = pool(dec!(100), dec!(0));
        state.active_premiums = dec!(10);
        assert!(state.ensure_can_reserve(dec!(5), dec!(85)).is_ok());
        assert!(state.ensure_can_reserve(dec!(5), dec!(90)).is_err());
    }

    #[test]
    fn test_withdrawal_liquidity_respects_ceiling() {
        let mut state = pool(dec!(100), dec!(20));
        assert_eq!(state.withdrawal_liquidity(), dec!(80));

        state.active_premiums = dec!(2);
        state.retained_premiums = dec!(50);
        assert_eq!(state.free_liquidity(), dec!(130));
        assert_eq!(state.withdrawal_liquidity(), dec!(78));

        state.collateral_factor = dec!(0.5);
        assert_eq!(state.withdrawal_liquidity(), dec!(56));
    }

    #[test]
    fn test_release_underflow_detected() {
        let state = pool(dec!(100), dec!(10));
        assert!(matches!(
            state.ensure_can_release(dec!(0), dec!(11)),
            Err(InsolvencyError::LockUnderflow { .. })
        ));
    }
}
