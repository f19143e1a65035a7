//! Underwriter positions and their withdrawal requests

use delayshield_common::{AccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::state::PoolState;

/// A withdrawal that could not be paid immediately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnstakeRequest {
    /// Position in the pool-wide FIFO order
    pub ticket: u64,
    pub pending_amount: Decimal,
    pub fulfilled_amount: Decimal,
    /// Terminal once set
    pub is_paid_out: bool,
    pub requested_at: Timestamp,
    /// End of the deposit hold when the request was made; later deposits
    /// do not move it
    pub available_at: Timestamp,
}

impl UnstakeRequest {
    pub fn new(ticket: u64, amount: Decimal, requested_at: Timestamp, available_at: Timestamp) -> Self {
        Self {
            ticket,
            pending_amount: amount,
            fulfilled_amount: Decimal::ZERO,
            is_paid_out: false,
            requested_at,
            available_at,
        }
    }

    pub fn is_ready(&self, now: Timestamp) -> bool {
        !self.is_paid_out && now >= self.available_at
    }

    /// Amount still to be fulfilled
    #[inline]
    pub fn remaining(&self) -> Decimal {
        self.pending_amount - self.fulfilled_amount
    }
}

/// One underwriter's stake
///
/// Created on first stake and never deleted; `staked` may fall to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderwriterPosition {
    pub underwriter: AccountId,
    pub staked: Decimal,
    /// Time of the most recent deposit; starts the withdrawal hold
    pub deposit_time: Timestamp,
    /// All requests, oldest first; paid-out ones are kept as history
    pub unstake_queue: Vec<UnstakeRequest>,
}

impl UnderwriterPosition {
    pub fn new(underwriter: AccountId, now: Timestamp) -> Self {
        Self {
            underwriter,
            staked: Decimal::ZERO,
            deposit_time: now,
            unstake_queue: Vec::new(),
        }
    }

    /// This position's share of the unlocked pool capital
    pub fn unlockable(&self, state: &PoolState) -> Decimal {
        state.unlocked_share(self.staked)
    }

    /// Amount already promised to open requests
    pub fn queued_remaining(&self) -> Decimal {
        self.unstake_queue
            .iter()
            .filter(|r| !r.is_paid_out)
            .map(UnstakeRequest::remaining)
            .sum()
    }

    /// What a new request may still ask for
    ///
    /// Open requests are subtracted so the same unlocked capital is never
    /// promised twice.
    pub fn unlocked(&self, state: &PoolState) -> Decimal {
        (self.unlockable(state) - self.queued_remaining()).max(Decimal::ZERO)
    }

    pub fn lock_expires_at(&self, lock_secs: i64) -> Timestamp {
        self.deposit_time.saturating_add(lock_secs)
    }

    pub fn open_requests(&self) -> impl Iterator<Item = &UnstakeRequest> {
        self.unstake_queue.iter().filter(|r| !r.is_paid_out)
    }

    /// Shrink open requests so together they never ask for more than
    /// what is still staked
    ///
    /// Requests left with nothing to fill are closed. Returns the closed
    /// requests as `(ticket, amount already held in escrow)`.
    pub fn cap_requests_to_stake(&mut self) -> Vec<(u64, Decimal)> {
        let mut room = self.staked;
        let mut closed = Vec::new();

        for request in self.unstake_queue.iter_mut().filter(|r| !r.is_paid_out) {
            let keep = request.remaining().min(room);
            room -= keep;
            request.pending_amount = request.fulfilled_amount + keep;
            if keep <= Decimal::ZERO {
                request.is_paid_out = true;
                closed.push((request.ticket, request.fulfilled_amount));
            }
        }
        closed
    }
}
