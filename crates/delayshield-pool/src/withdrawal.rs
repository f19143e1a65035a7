//! FIFO queue of withdrawals waiting for liquidity or for their time lock

use std::collections::{BTreeMap, VecDeque};

use delayshield_common::{AccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::{Disbursement, DisbursementReason};
use crate::position::{UnderwriterPosition, UnstakeRequest};
use crate::state::PoolState;

/// Pointer from the pool-wide order into an underwriter's own queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub underwriter: AccountId,
    pub ticket: u64,
}

/// Pool-wide withdrawal order
#[derive(Debug, Default)]
pub struct WithdrawalQueue {
    entries: VecDeque<QueueEntry>,
    next_ticket: u64,
}

impl WithdrawalQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_ticket: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a request for `amount` to the back of the queue
    ///
    /// The request may not be filled before `available_at`.
    pub fn enqueue(
        &mut self,
        position: &mut UnderwriterPosition,
        amount: Decimal,
        now: Timestamp,
        available_at: Timestamp,
    ) -> u64 {
        let ticket = self.next_ticket.max(1);
        self.next_ticket = ticket + 1;

        position
            .unstake_queue
            .push(UnstakeRequest::new(ticket, amount, now, available_at));
        self.entries.push_back(QueueEntry {
            underwriter: position.underwriter.clone(),
            ticket,
        });
        ticket
    }

    /// Drop the entry for `ticket` if it is still queued
    pub fn remove(&mut self, ticket: u64) {
        self.entries.retain(|e| e.ticket != ticket);
    }

    /// Whether some queued request could take liquidity right now
    ///
    /// A request counts when its hold has ended and its underwriter still
    /// has unlocked stake to draw from.
    pub fn has_ready_entry(
        &self,
        state: &PoolState,
        positions: &BTreeMap<AccountId, UnderwriterPosition>,
        now: Timestamp,
    ) -> bool {
        self.entries.iter().any(|entry| {
            positions.get(&entry.underwriter).is_some_and(|position| {
                position.unlockable(state) > Decimal::ZERO
                    && position
                        .open_requests()
                        .any(|r| r.ticket == entry.ticket && r.is_ready(now))
            })
        })
    }

    /// Fulfil queued requests in FIFO order
    ///
    /// Requests still inside their deposit hold keep their place and are
    /// skipped. Each underwriter may take at most
    /// `(1 − lockedRatio) × staked` per pass, using the ratio observed when
    /// the pass starts. Partial fills move stake into the withdrawal escrow;
    /// a request is paid out in full once its last portion is filled.
    pub fn process(
        &mut self,
        state: &mut PoolState,
        positions: &mut BTreeMap<AccountId, UnderwriterPosition>,
        now: Timestamp,
    ) -> Vec<Disbursement> {
        let at_start = state.clone();
        let mut liquidity = state.withdrawal_liquidity();
        let mut budgets: BTreeMap<AccountId, Decimal> = BTreeMap::new();
        let mut disbursements = Vec::new();
        let mut finished: Vec<u64> = Vec::new();

        for entry in &self.entries {
            if liquidity <= Decimal::ZERO {
                break;
            }

            let Some(position) = positions.get_mut(&entry.underwriter) else {
                finished.push(entry.ticket);
                continue;
            };
            let staked = position.staked;
            let budget = budgets
                .entry(entry.underwriter.clone())
                .or_insert_with(|| position.unlockable(&at_start));

            let Some(request) = position
                .unstake_queue
                .iter_mut()
                .find(|r| r.ticket == entry.ticket && !r.is_paid_out)
            else {
                finished.push(entry.ticket);
                continue;
            };
            if now < request.available_at {
                continue;
            }

            let fill = request.remaining().min(*budget).min(liquidity).min(staked);
            if fill > Decimal::ZERO {
                request.fulfilled_amount += fill;
                *budget -= fill;
                liquidity -= fill;
                state.total_staking_balance -= fill;
                state.withdrawal_escrow += fill;
                position.staked -= fill;
                debug!(
                    underwriter = %entry.underwriter,
                    ticket = entry.ticket,
                    %fill,
                    "Withdrawal partially filled"
                );
            }

            if request.remaining() <= Decimal::ZERO {
                request.is_paid_out = true;
                state.withdrawal_escrow -= request.pending_amount;
                disbursements.push(Disbursement {
                    to: entry.underwriter.clone(),
                    amount: request.pending_amount,
                    reason: DisbursementReason::Withdrawal {
                        ticket: Some(entry.ticket),
                    },
                });
                finished.push(entry.ticket);
            }
        }

        if !finished.is_empty() {
            self.entries.retain(|e| !finished.contains(&e.ticket));
        }
        disbursements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const LOCK: i64 = 100;

    fn setup(stakes: &[(&str, Decimal)]) -> (PoolState, BTreeMap<AccountId, UnderwriterPosition>) {
        let mut state = PoolState::new(Decimal::ONE);
        let mut positions = BTreeMap::new();
        for (name, amount) in stakes {
            let id = AccountId::from(*name);
            let mut position = UnderwriterPosition::new(id.clone(), 0);
            position.staked = *amount;
            state.total_staking_balance += *amount;
            positions.insert(id, position);
        }
        (state, positions)
    }

    #[test]
    fn test_tickets_are_sequential() {
        let (_, mut positions) = setup(&[("0xa", dec!(10))]);
        let mut queue = WithdrawalQueue::new();
        let position = positions.get_mut(&AccountId::from("0xa")).unwrap();

        assert_eq!(queue.enqueue(position, dec!(1), 0, LOCK), 1);
        assert_eq!(queue.enqueue(position, dec!(1), 0, LOCK), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_time_lock_skips_without_losing_place() {
        let (mut state, mut positions) = setup(&[("0xa", dec!(100))]);
        let mut queue = WithdrawalQueue::new();
        let position = positions.get_mut(&AccountId::from("0xa")).unwrap();
        queue.enqueue(position, dec!(40), 0, LOCK);

        let paid = queue.process(&mut state, &mut positions, LOCK - 1);
        assert!(paid.is_empty());
        assert_eq!(queue.len(), 1);

        let paid = queue.process(&mut state, &mut positions, LOCK);
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].amount, dec!(40));
        assert!(queue.is_empty());
        assert_eq!(state.total_staking_balance, dec!(60));
        assert_eq!(state.withdrawal_escrow, Decimal::ZERO);
    }

    #[test]
    fn test_partial_fill_then_completion() {
        let (mut state, mut positions) = setup(&[("0xa", dec!(100))]);
        state.locked_balance = dec!(70);
        let mut queue = WithdrawalQueue::new();
        let position = positions.get_mut(&AccountId::from("0xa")).unwrap();
        queue.enqueue(position, dec!(50), 0, LOCK);

        // 30 free: partial fill held in escrow
        let paid = queue.process(&mut state, &mut positions, LOCK);
        assert!(paid.is_empty());
        assert_eq!(state.withdrawal_escrow, dec!(30));
        assert_eq!(state.total_staking_balance, dec!(70));

        state.locked_balance = Decimal::ZERO;
        let paid = queue.process(&mut state, &mut positions, LOCK);
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].amount, dec!(50));
        assert_eq!(state.withdrawal_escrow, Decimal::ZERO);
        assert_eq!(state.total_staking_balance, dec!(50));

        let request = &positions[&AccountId::from("0xa")].unstake_queue[0];
        assert!(request.is_paid_out);
        assert_eq!(request.fulfilled_amount, request.pending_amount);
    }

    #[test]
    fn test_fifo_order_across_underwriters() {
        let (mut state, mut positions) = setup(&[("0xa", dec!(50)), ("0xb", dec!(50))]);
        let mut queue = WithdrawalQueue::new();
        queue.enqueue(positions.get_mut(&AccountId::from("0xb")).unwrap(), dec!(30), 0, LOCK);
        queue.enqueue(positions.get_mut(&AccountId::from("0xa")).unwrap(), dec!(30), 0, LOCK);

        // Ceiling leaves 40 withdrawable: the first request completes, the second is partial
        state.collateral_factor = dec!(0.5);
        state.locked_balance = dec!(30);
        let paid = queue.process(&mut state, &mut positions, LOCK);
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].to, AccountId::from("0xb"));
        assert_eq!(state.withdrawal_escrow, dec!(10));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_later_deposit_does_not_move_queued_hold() {
        let (mut state, mut positions) = setup(&[("0xa", dec!(100))]);
        let mut queue = WithdrawalQueue::new();
        let id = AccountId::from("0xa");
        queue.enqueue(positions.get_mut(&id).unwrap(), dec!(40), 0, LOCK);

        // Top-up restarts the position's hold but not the request's
        let position = positions.get_mut(&id).unwrap();
        position.staked += dec!(10);
        position.deposit_time = LOCK - 1;
        state.total_staking_balance += dec!(10);

        let paid = queue.process(&mut state, &mut positions, LOCK);
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].amount, dec!(40));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ready_entry_needs_elapsed_hold_and_unlocked_stake() {
        let (mut state, mut positions) = setup(&[("0xa", dec!(100))]);
        let mut queue = WithdrawalQueue::new();
        queue.enqueue(positions.get_mut(&AccountId::from("0xa")).unwrap(), dec!(40), 0, LOCK);

        assert!(!queue.has_ready_entry(&state, &positions, LOCK - 1));
        assert!(queue.has_ready_entry(&state, &positions, LOCK));

        state.locked_balance = dec!(100);
        assert!(!queue.has_ready_entry(&state, &positions, LOCK));
    }

    #[test]
    fn test_remove_drops_only_that_ticket() {
        let (_, mut positions) = setup(&[("0xa", dec!(10))]);
        let mut queue = WithdrawalQueue::new();
        let position = positions.get_mut(&AccountId::from("0xa")).unwrap();
        let first = queue.enqueue(position, dec!(1), 0, LOCK);
        queue.enqueue(position, dec!(1), 0, LOCK);

        queue.remove(first);
        assert_eq!(queue.len(), 1);
    }
}
