//! Risk pool ledger
//!
//! One [`RiskPool`] owns the pool balances, every underwriter position and
//! the withdrawal queue behind a single mutex, so each operation is applied
//! in full or not at all. Notifications are collected while the lock is
//! held and published after it is released.

use std::collections::BTreeMap;
use std::sync::Arc;

use delayshield_common::config::validate_collateral_factor;
use delayshield_common::{
    AccessControl, AccountId, Clock, EventBus, InsuranceEvent, PoolSettings, Timestamp,
};
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::{InsolvencyError, PoolError};
use crate::position::UnderwriterPosition;
use crate::state::{PoolState, SHARE_SCALE};
use crate::withdrawal::WithdrawalQueue;

/// Why collateral leaves the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisbursementReason {
    ClaimPayout,
    /// `ticket` is `None` for a withdrawal paid without queueing
    Withdrawal { ticket: Option<u64> },
}

/// Collateral owed to an account
///
/// The ledger has already debited its books when one of these is returned;
/// moving the actual tokens is up to the token adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disbursement {
    pub to: AccountId,
    pub amount: Decimal,
    pub reason: DisbursementReason,
}

impl Disbursement {
    fn event(&self) -> InsuranceEvent {
        match self.reason {
            DisbursementReason::ClaimPayout => InsuranceEvent::ClaimPaid {
                buyer: self.to.clone(),
                amount: self.amount,
            },
            DisbursementReason::Withdrawal { ticket } => InsuranceEvent::UnstakePaid {
                underwriter: self.to.clone(),
                ticket,
                amount: self.amount,
            },
        }
    }
}

/// Result of a withdrawal request
#[derive(Debug, Clone, PartialEq)]
pub enum UnstakeOutcome {
    /// Paid at once
    Paid(Disbursement),
    /// Waiting in the queue; not payable before `available_at`
    Queued { ticket: u64, available_at: Timestamp },
}

/// Read-only view of the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub total_staking_balance: Decimal,
    pub locked_balance: Decimal,
    pub active_premiums: Decimal,
    pub retained_premiums: Decimal,
    pub withdrawal_escrow: Decimal,
    pub collateral_factor: Decimal,
    pub available_capacity: Decimal,
    pub locked_ratio: Decimal,
    pub funds: Decimal,
    pub free_liquidity: Decimal,
    pub underwriters: usize,
    pub queued_withdrawals: usize,
    pub halted: Option<String>,
}

struct PoolInner {
    state: PoolState,
    positions: BTreeMap<AccountId, UnderwriterPosition>,
    queue: WithdrawalQueue,
    unstake_lock_secs: i64,
    halted: Option<String>,
}

impl PoolInner {
    fn ensure_running(&self) -> Result<(), PoolError> {
        match &self.halted {
            Some(reason) => Err(PoolError::Halted {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Record an integrity fault and stop all further mutation
    fn halt(&mut self, fault: InsolvencyError, events: &mut Vec<InsuranceEvent>) -> PoolError {
        let reason = fault.to_string();
        error!(%reason, "Risk pool halted");
        self.halted = Some(reason.clone());
        events.push(InsuranceEvent::PoolHalted { reason });
        PoolError::Insolvency(fault)
    }

    fn run_queue(&mut self, now: Timestamp, events: &mut Vec<InsuranceEvent>) -> Vec<Disbursement> {
        let paid = self
            .queue
            .process(&mut self.state, &mut self.positions, now);
        events.extend(paid.iter().map(Disbursement::event));
        paid
    }

    /// Spread a claim loss over positions in proportion to their stake
    ///
    /// Queued withdrawals are trimmed to what their underwriter still has
    /// staked. A request left with nothing to fill is closed and whatever it
    /// already holds in escrow is paid out.
    fn absorb_loss(&mut self, loss: Decimal) -> Vec<Disbursement> {
        if loss <= Decimal::ZERO {
            return Vec::new();
        }

        let total = self.state.total_staking_balance;
        let holders = self
            .positions
            .values()
            .filter(|p| p.staked > Decimal::ZERO)
            .count();
        let mut remaining = loss;

        for (i, position) in self
            .positions
            .values_mut()
            .filter(|p| p.staked > Decimal::ZERO)
            .enumerate()
        {
            let share = if i + 1 == holders {
                remaining
            } else {
                (loss * position.staked / total)
                    .round_dp_with_strategy(SHARE_SCALE, RoundingStrategy::ToZero)
            };
            let take = share.min(position.staked).min(remaining);
            position.staked -= take;
            remaining -= take;
        }

        // Rounding leftovers
        for position in self.positions.values_mut() {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = remaining.min(position.staked);
            position.staked -= take;
            remaining -= take;
        }

        self.state.total_staking_balance -= loss - remaining;

        let mut paid = Vec::new();
        for position in self.positions.values_mut() {
            for (ticket, held) in position.cap_requests_to_stake() {
                self.queue.remove(ticket);
                self.state.withdrawal_escrow -= held;
                warn!(
                    underwriter = %position.underwriter,
                    ticket,
                    %held,
                    "Queued withdrawal cut short by claim loss"
                );
                if held > Decimal::ZERO {
                    paid.push(Disbursement {
                        to: position.underwriter.clone(),
                        amount: held,
                        reason: DisbursementReason::Withdrawal {
                            ticket: Some(ticket),
                        },
                    });
                }
            }
        }
        paid
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            total_staking_balance: self.state.total_staking_balance,
            locked_balance: self.state.locked_balance,
            active_premiums: self.state.active_premiums,
            retained_premiums: self.state.retained_premiums,
            withdrawal_escrow: self.state.withdrawal_escrow,
            collateral_factor: self.state.collateral_factor,
            available_capacity: self.state.available_capacity(),
            locked_ratio: self.state.locked_ratio(),
            funds: self.state.funds(),
            free_liquidity: self.state.free_liquidity(),
            underwriters: self.positions.len(),
            queued_withdrawals: self.queue.len(),
            halted: self.halted.clone(),
        }
    }
}

/// The risk pool ledger
pub struct RiskPool {
    inner: Mutex<PoolInner>,
    access: Arc<AccessControl>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl RiskPool {
    pub fn new(
        settings: &PoolSettings,
        access: Arc<AccessControl>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
    ) -> Result<Self, PoolError> {
        validate_collateral_factor(settings.collateral_factor)?;
        if settings.unstake_lock_secs < 0 {
            return Err(PoolError::InvalidAmount);
        }

        Ok(Self {
            inner: Mutex::new(PoolInner {
                state: PoolState::new(settings.collateral_factor),
                positions: BTreeMap::new(),
                queue: WithdrawalQueue::new(),
                unstake_lock_secs: settings.unstake_lock_secs,
                halted: None,
            }),
            access,
            clock,
            events,
        })
    }

    /// True iff `availableCapacity ≥ payoff`
    pub fn check_capacity(&self, payoff: Decimal) -> bool {
        self.inner.lock().state.available_capacity() >= payoff
    }

    /// Reserve `payoff` and take in `premium` for a newly sold policy
    ///
    /// The capacity check and the mutation happen under one lock; on
    /// failure nothing changes.
    #[instrument(skip(self, buyer), fields(buyer = %buyer))]
    pub fn reserve(
        &self,
        premium: Decimal,
        payoff: Decimal,
        buyer: &AccountId,
    ) -> Result<(), PoolError> {
        if premium < Decimal::ZERO || payoff <= Decimal::ZERO {
            return Err(PoolError::InvalidAmount);
        }

        let mut inner = self.inner.lock();
        inner.ensure_running()?;

        if let Err(e) = inner.state.ensure_can_reserve(premium, payoff) {
            warn!(%payoff, available = %inner.state.available_capacity(), "Reservation refused");
            return Err(e);
        }

        let locked = inner
            .state
            .locked_balance
            .checked_add(payoff)
            .ok_or(PoolError::Overflow)?;
        let active = inner
            .state
            .active_premiums
            .checked_add(premium)
            .ok_or(PoolError::Overflow)?;
        inner.state.locked_balance = locked;
        inner.state.active_premiums = active;

        info!(
            %premium,
            %payoff,
            locked_ratio = %inner.state.locked_ratio(),
            "Capital reserved"
        );
        Ok(())
    }

    /// Drop a reservation after the policy expired without a payout
    ///
    /// The premium becomes retained pool income. Freed capital is offered
    /// to the withdrawal queue straight away.
    #[instrument(skip(self, buyer), fields(buyer = %buyer))]
    pub fn release(
        &self,
        premium: Decimal,
        payoff: Decimal,
        buyer: &AccountId,
    ) -> Result<Vec<Disbursement>, PoolError> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            self.release_locked(&mut inner, premium, payoff, &mut events)
        };
        self.events.publish_all(events);
        result
    }

    fn release_locked(
        &self,
        inner: &mut PoolInner,
        premium: Decimal,
        payoff: Decimal,
        events: &mut Vec<InsuranceEvent>,
    ) -> Result<Vec<Disbursement>, PoolError> {
        inner.ensure_running()?;

        if let Err(fault) = inner.state.ensure_can_release(premium, payoff) {
            return Err(inner.halt(fault, events));
        }

        inner.state.locked_balance -= payoff;
        inner.state.active_premiums -= premium;
        inner.state.retained_premiums += premium;
        info!(%premium, %payoff, "Reservation released");

        Ok(inner.run_queue(self.clock.now(), events))
    }

    /// Settle a claim: release the reservation and pay `payout` to the buyer
    ///
    /// `payout` is the amount actually owed and may be lower than the
    /// reserved `payoff`. The premium covers the payout first; the rest is a
    /// loss shared by underwriters in proportion to their stake. The first
    /// disbursement in the returned list is the claim payout.
    #[instrument(skip(self, buyer), fields(buyer = %buyer))]
    pub fn pay_claim(
        &self,
        premium: Decimal,
        payoff: Decimal,
        payout: Decimal,
        buyer: &AccountId,
    ) -> Result<Vec<Disbursement>, PoolError> {
        if payout <= Decimal::ZERO {
            return Err(PoolError::InvalidAmount);
        }
        if payout > payoff {
            return Err(PoolError::PayoutExceedsReservation { payout, payoff });
        }

        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            self.pay_claim_locked(&mut inner, premium, payoff, payout, buyer, &mut events)
        };
        self.events.publish_all(events);
        result
    }

    fn pay_claim_locked(
        &self,
        inner: &mut PoolInner,
        premium: Decimal,
        payoff: Decimal,
        payout: Decimal,
        buyer: &AccountId,
        events: &mut Vec<InsuranceEvent>,
    ) -> Result<Vec<Disbursement>, PoolError> {
        inner.ensure_running()?;

        if let Err(fault) = inner.state.ensure_can_release(premium, payoff) {
            return Err(inner.halt(fault, events));
        }

        let available = inner.state.claimable_funds();
        if available < payout {
            let fault = InsolvencyError::InsufficientFunds {
                required: payout,
                available,
            };
            return Err(inner.halt(fault, events));
        }

        let loss = (payout - premium).max(Decimal::ZERO);
        if loss > inner.state.total_staking_balance {
            let fault = InsolvencyError::StakeShortfall {
                loss,
                staked: inner.state.total_staking_balance,
            };
            return Err(inner.halt(fault, events));
        }

        inner.state.locked_balance -= payoff;
        inner.state.active_premiums -= premium;
        if payout < premium {
            inner.state.retained_premiums += premium - payout;
        }
        let closed = inner.absorb_loss(loss);

        info!(%payout, %payoff, %loss, "Claim paid");

        let claim = Disbursement {
            to: buyer.clone(),
            amount: payout,
            reason: DisbursementReason::ClaimPayout,
        };
        events.push(claim.event());
        events.extend(closed.iter().map(Disbursement::event));

        let mut paid = vec![claim];
        paid.extend(closed);
        paid.extend(inner.run_queue(self.clock.now(), events));
        Ok(paid)
    }

    /// Add capital for `underwriter`
    ///
    /// Restarts the underwriter's withdrawal hold for requests made from
    /// now on; requests already queued keep theirs.
    #[instrument(skip(self, underwriter), fields(underwriter = %underwriter))]
    pub fn stake(
        &self,
        underwriter: &AccountId,
        amount: Decimal,
    ) -> Result<Vec<Disbursement>, PoolError> {
        if amount <= Decimal::ZERO {
            return Err(PoolError::InvalidAmount);
        }

        let now = self.clock.now();
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            self.stake_locked(&mut inner, underwriter, amount, now, &mut events)
        };
        self.events.publish_all(events);
        result
    }

    fn stake_locked(
        &self,
        inner: &mut PoolInner,
        underwriter: &AccountId,
        amount: Decimal,
        now: Timestamp,
        events: &mut Vec<InsuranceEvent>,
    ) -> Result<Vec<Disbursement>, PoolError> {
        inner.ensure_running()?;

        let total = inner
            .state
            .total_staking_balance
            .checked_add(amount)
            .ok_or(PoolError::Overflow)?;

        let position = inner
            .positions
            .entry(underwriter.clone())
            .or_insert_with(|| UnderwriterPosition::new(underwriter.clone(), now));
        position.staked += amount;
        position.deposit_time = now;
        let staked = position.staked;
        inner.state.total_staking_balance = total;

        info!(%amount, %staked, total = %total, "Stake added");
        events.push(InsuranceEvent::Staked {
            underwriter: underwriter.clone(),
            amount,
        });

        Ok(inner.run_queue(now, events))
    }

    /// Withdraw up to the underwriter's unlocked share
    ///
    /// Eligibility uses the locked ratio as it stands before the request.
    /// The request is paid at once when the hold has elapsed, no queued
    /// request could take the liquidity right now and the pool has enough
    /// of it; otherwise it joins the queue. Requests that are queued only
    /// behind held entries are served by the next queue pass.
    #[instrument(skip(self, underwriter), fields(underwriter = %underwriter))]
    pub fn request_unstake(
        &self,
        underwriter: &AccountId,
        amount: Decimal,
    ) -> Result<UnstakeOutcome, PoolError> {
        if amount <= Decimal::ZERO {
            return Err(PoolError::InvalidAmount);
        }

        let now = self.clock.now();
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            Self::request_unstake_locked(&mut inner, underwriter, amount, now, &mut events)
        };
        self.events.publish_all(events);
        result
    }

    fn request_unstake_locked(
        inner: &mut PoolInner,
        underwriter: &AccountId,
        amount: Decimal,
        now: Timestamp,
        events: &mut Vec<InsuranceEvent>,
    ) -> Result<UnstakeOutcome, PoolError> {
        inner.ensure_running()?;

        let at_request = inner.state.clone();
        let liquidity = at_request.withdrawal_liquidity();
        let queue_ready = inner
            .queue
            .has_ready_entry(&at_request, &inner.positions, now);
        let lock_secs = inner.unstake_lock_secs;

        let position = inner
            .positions
            .get_mut(underwriter)
            .ok_or_else(|| PoolError::UnknownUnderwriter(underwriter.clone()))?;

        let unlocked = position.unlocked(&at_request);
        if amount > unlocked {
            warn!(%amount, %unlocked, "Withdrawal exceeds unlocked stake");
            return Err(PoolError::InsufficientUnlocked {
                requested: amount,
                unlocked,
            });
        }

        let available_at = position.lock_expires_at(lock_secs);
        if now >= available_at && !queue_ready && liquidity >= amount {
            position.staked -= amount;
            inner.state.total_staking_balance -= amount;

            info!(%amount, "Withdrawal paid");
            let paid = Disbursement {
                to: underwriter.clone(),
                amount,
                reason: DisbursementReason::Withdrawal { ticket: None },
            };
            events.push(paid.event());
            return Ok(UnstakeOutcome::Paid(paid));
        }

        let ticket = inner.queue.enqueue(position, amount, now, available_at);
        info!(%amount, ticket, available_at, "Withdrawal queued");
        events.push(InsuranceEvent::UnstakeQueued {
            underwriter: underwriter.clone(),
            ticket,
            amount,
            available_at,
        });
        Ok(UnstakeOutcome::Queued {
            ticket,
            available_at,
        })
    }

    /// Run the withdrawal queue against current liquidity
    #[instrument(skip(self))]
    pub fn process_withdrawals(&self) -> Result<Vec<Disbursement>, PoolError> {
        let now = self.clock.now();
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            inner
                .ensure_running()
                .map(|_| inner.run_queue(now, &mut events))
        };
        self.events.publish_all(events);
        result
    }

    /// Change the collateral factor (owner only)
    ///
    /// Applies to future capacity checks; existing reservations stand.
    #[instrument(skip(self, caller), fields(caller = %caller))]
    pub fn set_collateral_factor(&self, caller: &AccountId, factor: Decimal) -> Result<(), PoolError> {
        self.access.require_owner(caller)?;
        validate_collateral_factor(factor)?;

        let previous = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.state.collateral_factor, factor)
        };

        info!(%previous, current = %factor, "Collateral factor changed");
        self.events.publish(InsuranceEvent::CollateralFactorChanged {
            previous,
            current: factor,
        });
        Ok(())
    }

    /// Change the deposit hold (owner only)
    #[instrument(skip(self, caller), fields(caller = %caller))]
    pub fn set_unstake_lock(&self, caller: &AccountId, secs: i64) -> Result<(), PoolError> {
        self.access.require_owner(caller)?;
        if secs < 0 {
            return Err(PoolError::InvalidAmount);
        }

        self.inner.lock().unstake_lock_secs = secs;
        self.events.publish(InsuranceEvent::ParameterChanged {
            name: "unstake_lock_secs".into(),
            value: secs.to_string(),
        });
        Ok(())
    }

    /// Clear a halt after the owner has dealt with the fault
    #[instrument(skip(self, caller), fields(caller = %caller))]
    pub fn resume(&self, caller: &AccountId) -> Result<(), PoolError> {
        self.access.require_owner(caller)?;

        let previous = self.inner.lock().halted.take();
        if let Some(reason) = previous {
            warn!(%reason, "Risk pool resumed by owner");
            self.events.publish(InsuranceEvent::PoolResumed);
        }
        Ok(())
    }

    pub fn is_halted(&self) -> bool {
        self.inner.lock().halted.is_some()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn state(&self) -> PoolState {
        self.inner.lock().state.clone()
    }

    pub fn position(&self, underwriter: &AccountId) -> Option<UnderwriterPosition> {
        self.inner.lock().positions.get(underwriter).cloned()
    }

    /// What `underwriter` could request right now
    pub fn unlocked_for(&self, underwriter: &AccountId) -> Decimal {
        let inner = self.inner.lock();
        inner
            .positions
            .get(underwriter)
            .map(|p| p.unlocked(&inner.state))
            .unwrap_or(Decimal::ZERO)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn unstake_lock_secs(&self) -> i64 {
        self.inner.lock().unstake_lock_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delayshield_common::{ManualClock, MemoryEventSink, UNSTAKE_LOCK_SECS};
    use rust_decimal_macros::dec;

    const START: Timestamp = 1_700_000_000;

    struct Fixture {
        pool: RiskPool,
        clock: ManualClock,
        sink: Arc<MemoryEventSink>,
    }

    fn owner() -> AccountId {
        AccountId::from("0xowner")
    }

    fn lp(name: &str) -> AccountId {
        AccountId::from(name)
    }

    fn buyer() -> AccountId {
        AccountId::from("0xbuyer")
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(START);
        let events = Arc::new(EventBus::empty());
        let sink = Arc::new(MemoryEventSink::new());
        events.add_sink(sink.clone());
        let access = Arc::new(AccessControl::new(owner(), AccountId::from("0xregistry")));
        let pool = RiskPool::new(
            &PoolSettings::default(),
            access,
            Arc::new(clock.clone()),
            events,
        )
        .unwrap();
        Fixture { pool, clock, sink }
    }

    #[test]
    fn test_stake_creates_position() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.stake(&lp("0xa"), dec!(50)).unwrap();

        let position = f.pool.position(&lp("0xa")).unwrap();
        assert_eq!(position.staked, dec!(150));
        assert_eq!(f.pool.snapshot().total_staking_balance, dec!(150));
        assert_eq!(f.sink.count("Staked"), 2);
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let f = fixture();
        assert_eq!(f.pool.stake(&lp("0xa"), dec!(0)), Err(PoolError::InvalidAmount));
        assert_eq!(
            f.pool.reserve(dec!(1), dec!(-5), &buyer()),
            Err(PoolError::InvalidAmount)
        );
    }

    #[test]
    fn test_reserve_and_release_round_trip() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(1000)).unwrap();
        let before = f.pool.state();

        f.pool.reserve(dec!(10), dec!(300), &buyer()).unwrap();
        let reserved = f.pool.state();
        assert_eq!(reserved.locked_balance, dec!(300));
        assert_eq!(reserved.active_premiums, dec!(10));
        assert_eq!(reserved.locked_ratio(), dec!(0.3));

        f.pool.release(dec!(10), dec!(300), &buyer()).unwrap();
        let after = f.pool.state();
        assert_eq!(after.locked_balance, before.locked_balance);
        assert_eq!(after.active_premiums, before.active_premiums);
        assert_eq!(after.retained_premiums, dec!(10));
    }

    #[test]
    fn test_reserve_refused_without_capacity() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        assert!(f.pool.check_capacity(dec!(100)));
        assert!(!f.pool.check_capacity(dec!(101)));

        let err = f.pool.reserve(dec!(5), dec!(101), &buyer()).unwrap_err();
        assert!(matches!(err, PoolError::InsufficientCapacity { .. }));
        assert_eq!(f.pool.state().locked_balance, Decimal::ZERO);
        assert_eq!(f.pool.state().active_premiums, Decimal::ZERO);
    }

    #[test]
    fn test_pay_claim_moves_loss_to_underwriters() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(300)).unwrap();
        f.pool.stake(&lp("0xb"), dec!(100)).unwrap();
        f.pool.reserve(dec!(20), dec!(200), &buyer()).unwrap();

        let paid = f.pool.pay_claim(dec!(20), dec!(200), dec!(120), &buyer()).unwrap();
        assert_eq!(paid[0].amount, dec!(120));
        assert_eq!(paid[0].reason, DisbursementReason::ClaimPayout);

        // 100 loss split 3:1
        assert_eq!(f.pool.position(&lp("0xa")).unwrap().staked, dec!(225));
        assert_eq!(f.pool.position(&lp("0xb")).unwrap().staked, dec!(75));

        let state = f.pool.state();
        assert_eq!(state.total_staking_balance, dec!(300));
        assert_eq!(state.locked_balance, Decimal::ZERO);
        assert_eq!(state.active_premiums, Decimal::ZERO);
        assert_eq!(f.sink.count("ClaimPaid"), 1);
    }

    #[test]
    fn test_small_payout_keeps_premium_remainder() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.reserve(dec!(10), dec!(50), &buyer()).unwrap();

        f.pool.pay_claim(dec!(10), dec!(50), dec!(4), &buyer()).unwrap();
        let state = f.pool.state();
        assert_eq!(state.retained_premiums, dec!(6));
        assert_eq!(state.total_staking_balance, dec!(100));
    }

    #[test]
    fn test_payout_above_reservation_rejected() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.reserve(dec!(1), dec!(50), &buyer()).unwrap();
        assert!(matches!(
            f.pool.pay_claim(dec!(1), dec!(50), dec!(51), &buyer()),
            Err(PoolError::PayoutExceedsReservation { .. })
        ));
        assert!(!f.pool.is_halted());
    }

    #[test]
    fn test_release_underflow_halts_pool() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();

        let err = f.pool.release(dec!(0), dec!(10), &buyer()).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Insolvency(InsolvencyError::LockUnderflow { .. })
        ));
        assert!(f.pool.is_halted());
        assert_eq!(f.sink.count("PoolHalted"), 1);

        assert!(matches!(
            f.pool.stake(&lp("0xa"), dec!(1)),
            Err(PoolError::Halted { .. })
        ));

        assert!(f.pool.resume(&lp("0xa")).is_err());
        f.pool.resume(&owner()).unwrap();
        assert!(!f.pool.is_halted());
        f.pool.stake(&lp("0xa"), dec!(1)).unwrap();
    }

    #[test]
    fn test_unstake_limit_follows_locked_ratio() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.reserve(dec!(0), dec!(20), &buyer()).unwrap();
        f.clock.advance(UNSTAKE_LOCK_SECS);

        assert_eq!(f.pool.unlocked_for(&lp("0xa")), dec!(80));
        assert!(matches!(
            f.pool.request_unstake(&lp("0xa"), dec!(81)),
            Err(PoolError::InsufficientUnlocked { .. })
        ));

        let outcome = f.pool.request_unstake(&lp("0xa"), dec!(80)).unwrap();
        assert!(matches!(outcome, UnstakeOutcome::Paid(ref d) if d.amount == dec!(80)));
        assert_eq!(f.pool.position(&lp("0xa")).unwrap().staked, dec!(20));
        assert_eq!(f.pool.state().locked_ratio(), Decimal::ONE);
    }

    #[test]
    fn test_unstake_before_lock_is_queued() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();

        let outcome = f.pool.request_unstake(&lp("0xa"), dec!(40)).unwrap();
        assert_eq!(
            outcome,
            UnstakeOutcome::Queued {
                ticket: 1,
                available_at: START + UNSTAKE_LOCK_SECS
            }
        );
        // Queued amount is no longer unlocked
        assert_eq!(f.pool.unlocked_for(&lp("0xa")), dec!(60));
        assert!(f.pool.process_withdrawals().unwrap().is_empty());

        f.clock.advance(UNSTAKE_LOCK_SECS);
        let paid = f.pool.process_withdrawals().unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].amount, dec!(40));
        assert_eq!(f.pool.queue_len(), 0);
        assert_eq!(f.pool.state().total_staking_balance, dec!(60));
        assert_eq!(f.sink.count("UnstakePaid"), 1);
    }

    #[test]
    fn test_claim_loss_trims_queued_withdrawal() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        let queued = f.pool.request_unstake(&lp("0xa"), dec!(100)).unwrap();
        assert!(matches!(queued, UnstakeOutcome::Queued { ticket: 1, .. }));
        f.pool.stake(&lp("0xb"), dec!(100)).unwrap();

        f.pool.reserve(dec!(0), dec!(100), &buyer()).unwrap();
        f.pool.pay_claim(dec!(0), dec!(100), dec!(100), &buyer()).unwrap();

        // 0xa kept 50, so the request can only ever deliver 50
        let position = f.pool.position(&lp("0xa")).unwrap();
        assert_eq!(position.staked, dec!(50));
        assert_eq!(position.queued_remaining(), dec!(50));

        f.clock.advance(UNSTAKE_LOCK_SECS);
        let paid = f.pool.process_withdrawals().unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].amount, dec!(50));
        assert_eq!(paid[0].reason, DisbursementReason::Withdrawal { ticket: Some(1) });

        let snapshot = f.pool.snapshot();
        assert_eq!(snapshot.queued_withdrawals, 0);
        assert_eq!(snapshot.withdrawal_escrow, Decimal::ZERO);
        assert!(f.pool.position(&lp("0xa")).unwrap().unstake_queue[0].is_paid_out);

        // Nothing stale left in front of the next underwriter
        let outcome = f.pool.request_unstake(&lp("0xb"), dec!(50)).unwrap();
        assert!(matches!(outcome, UnstakeOutcome::Paid(ref d) if d.amount == dec!(50)));
    }

    #[test]
    fn test_claim_loss_closes_request_and_releases_escrow() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.request_unstake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.reserve(dec!(0), dec!(60), &buyer()).unwrap();

        f.clock.advance(UNSTAKE_LOCK_SECS);
        assert!(f.pool.process_withdrawals().unwrap().is_empty());
        assert_eq!(f.pool.snapshot().withdrawal_escrow, dec!(40));

        // The claim wipes out the remaining stake
        let paid = f.pool.pay_claim(dec!(0), dec!(60), dec!(60), &buyer()).unwrap();
        assert_eq!(paid.len(), 2);
        assert_eq!(paid[0].reason, DisbursementReason::ClaimPayout);
        assert_eq!(paid[1].amount, dec!(40));
        assert_eq!(paid[1].reason, DisbursementReason::Withdrawal { ticket: Some(1) });

        let snapshot = f.pool.snapshot();
        assert_eq!(snapshot.total_staking_balance, Decimal::ZERO);
        assert_eq!(snapshot.withdrawal_escrow, Decimal::ZERO);
        assert_eq!(snapshot.queued_withdrawals, 0);
        assert_eq!(snapshot.funds, Decimal::ZERO);
        assert_eq!(f.sink.count("UnstakePaid"), 1);
    }

    #[test]
    fn test_held_entries_do_not_block_ready_withdrawal() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(1000)).unwrap();
        f.clock.advance(UNSTAKE_LOCK_SECS);

        // 0xc is still inside its hold
        f.pool.stake(&lp("0xc"), dec!(10)).unwrap();
        let held = f.pool.request_unstake(&lp("0xc"), dec!(5)).unwrap();
        assert!(matches!(held, UnstakeOutcome::Queued { .. }));

        let outcome = f.pool.request_unstake(&lp("0xa"), dec!(10)).unwrap();
        assert!(matches!(outcome, UnstakeOutcome::Paid(ref d) if d.amount == dec!(10)));
        assert_eq!(f.pool.queue_len(), 1);

        f.clock.advance(UNSTAKE_LOCK_SECS);
        let paid = f.pool.process_withdrawals().unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].to, lp("0xc"));
    }

    #[test]
    fn test_ready_entry_ahead_keeps_fifo() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.stake(&lp("0xb"), dec!(100)).unwrap();
        f.pool.request_unstake(&lp("0xb"), dec!(20)).unwrap();
        f.clock.advance(UNSTAKE_LOCK_SECS);

        // 0xb's request became payable without a queue pass; 0xa waits behind it
        let outcome = f.pool.request_unstake(&lp("0xa"), dec!(10)).unwrap();
        assert!(matches!(outcome, UnstakeOutcome::Queued { ticket: 2, .. }));

        let paid = f.pool.process_withdrawals().unwrap();
        let order: Vec<_> = paid.iter().map(|d| d.to.clone()).collect();
        assert_eq!(order, vec![lp("0xb"), lp("0xa")]);
    }

    #[test]
    fn test_top_up_does_not_delay_queued_withdrawal() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.request_unstake(&lp("0xa"), dec!(40)).unwrap();

        f.clock.advance(UNSTAKE_LOCK_SECS - 1);
        f.pool.stake(&lp("0xa"), dec!(10)).unwrap();
        f.clock.advance(1);

        let paid = f.pool.process_withdrawals().unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].amount, dec!(40));

        // Fresh requests wait for the new hold
        let outcome = f.pool.request_unstake(&lp("0xa"), dec!(10)).unwrap();
        assert_eq!(
            outcome,
            UnstakeOutcome::Queued {
                ticket: 2,
                available_at: START + 2 * UNSTAKE_LOCK_SECS - 1
            }
        );
    }

    #[test]
    fn test_unlocked_share_tracks_ratio() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.stake(&lp("0xb"), dec!(100)).unwrap();
        f.clock.advance(UNSTAKE_LOCK_SECS);
        f.pool.reserve(dec!(0), dec!(150), &buyer()).unwrap();

        // 25 unlocked each, only 50 free in total
        let first = f.pool.request_unstake(&lp("0xa"), dec!(25)).unwrap();
        assert!(matches!(first, UnstakeOutcome::Paid(_)));
        assert_eq!(f.pool.state().locked_ratio(), dec!(150) / dec!(175));

        // The withdrawal raised the ratio, so 0xb's share shrank
        let unlocked = f.pool.unlocked_for(&lp("0xb"));
        assert!(unlocked < dec!(25));

        f.pool.release(dec!(0), dec!(150), &buyer()).unwrap();
        assert_eq!(f.pool.unlocked_for(&lp("0xb")), dec!(100));
    }

    #[test]
    fn test_collateral_factor_cut_honors_existing_locks() {
        let f = fixture();
        f.pool.stake(&lp("0xa"), dec!(100)).unwrap();
        f.pool.reserve(dec!(0), dec!(70), &buyer()).unwrap();

        assert!(f.pool.set_collateral_factor(&lp("0xa"), dec!(0.5)).is_err());
        f.pool.set_collateral_factor(&owner(), dec!(0.5)).unwrap();

        let snapshot = f.pool.snapshot();
        assert_eq!(snapshot.available_capacity, Decimal::ZERO);
        assert_eq!(snapshot.locked_balance, dec!(70));
        assert!(!f.pool.check_capacity(dec!(1)));
        f.pool.release(dec!(0), dec!(70), &buyer()).unwrap();
        assert!(f.pool.check_capacity(dec!(50)));

        assert!(matches!(
            f.pool.set_collateral_factor(&owner(), dec!(0)),
            Err(PoolError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_underwriter() {
        let f = fixture();
        assert_eq!(
            f.pool.request_unstake(&lp("0xghost"), dec!(1)),
            Err(PoolError::UnknownUnderwriter(lp("0xghost")))
        );
    }
}
