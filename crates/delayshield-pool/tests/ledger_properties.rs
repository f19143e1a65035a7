//! Ledger invariants over arbitrary operation sequences

use std::sync::Arc;

use delayshield_common::{AccessControl, AccountId, EventBus, ManualClock, PoolSettings};
use delayshield_pool::{PoolError, RiskPool};
use proptest::prelude::*;
use rust_decimal::Decimal;

const UNDERWRITERS: [&str; 3] = ["0xa", "0xb", "0xc"];

#[derive(Debug, Clone)]
enum Op {
    Stake(usize, u32),
    Unstake(usize, u32),
    Reserve(u32, u32),
    Settle { expire: bool, payout_pct: u32 },
    Advance(i64),
    Process,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize, 1..5_000u32).prop_map(|(u, a)| Op::Stake(u, a)),
        (0..3usize, 1..5_000u32).prop_map(|(u, a)| Op::Unstake(u, a)),
        (0..50u32, 1..3_000u32).prop_map(|(p, a)| Op::Reserve(p, a)),
        (any::<bool>(), 1..=100u32).prop_map(|(expire, payout_pct)| Op::Settle { expire, payout_pct }),
        (0..1_000_000i64).prop_map(Op::Advance),
        Just(Op::Process),
    ]
}

struct Harness {
    pool: RiskPool,
    clock: ManualClock,
    open: Vec<(Decimal, Decimal)>,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new(0);
        let access = Arc::new(AccessControl::new(
            AccountId::from("0xowner"),
            AccountId::from("0xregistry"),
        ));
        let pool = RiskPool::new(
            &PoolSettings::default(),
            access,
            Arc::new(clock.clone()),
            Arc::new(EventBus::empty()),
        )
        .unwrap();
        Self {
            pool,
            clock,
            open: Vec::new(),
        }
    }

    fn apply(&mut self, op: &Op) {
        let buyer = AccountId::from("0xbuyer");
        match *op {
            Op::Stake(u, amount) => {
                self.pool
                    .stake(&AccountId::from(UNDERWRITERS[u]), Decimal::from(amount))
                    .unwrap();
            }
            Op::Unstake(u, amount) => {
                match self
                    .pool
                    .request_unstake(&AccountId::from(UNDERWRITERS[u]), Decimal::from(amount))
                {
                    Ok(_)
                    | Err(PoolError::InsufficientUnlocked { .. })
                    | Err(PoolError::UnknownUnderwriter(_)) => {}
                    Err(e) => panic!("unexpected unstake error: {e}"),
                }
            }
            Op::Reserve(premium, payoff) => {
                let premium = Decimal::from(premium);
                let payoff = Decimal::from(payoff);
                match self.pool.reserve(premium, payoff, &buyer) {
                    Ok(()) => self.open.push((premium, payoff)),
                    Err(PoolError::InsufficientCapacity { .. }) => {}
                    Err(e) => panic!("unexpected reserve error: {e}"),
                }
            }
            Op::Settle { expire, payout_pct } => {
                if let Some((premium, payoff)) = self.open.pop() {
                    if expire {
                        self.pool.release(premium, payoff, &buyer).unwrap();
                    } else {
                        let payout = (payoff * Decimal::from(payout_pct) / Decimal::from(100))
                            .max(Decimal::ONE)
                            .min(payoff);
                        self.pool.pay_claim(premium, payoff, payout, &buyer).unwrap();
                    }
                }
            }
            Op::Advance(secs) => {
                self.clock.advance(secs);
            }
            Op::Process => {
                self.pool.process_withdrawals().unwrap();
            }
        }
    }

    fn check(&self) {
        let state = self.pool.state();
        assert!(state.available_capacity() >= Decimal::ZERO);
        assert!(state.locked_ratio() >= Decimal::ZERO);
        assert!(state.locked_ratio() <= Decimal::ONE);
        assert!(
            state.active_premiums + state.locked_balance
                <= state.total_staking_balance * state.collateral_factor
        );

        let positions: Vec<_> = UNDERWRITERS
            .iter()
            .filter_map(|u| self.pool.position(&AccountId::from(*u)))
            .collect();
        let staked: Decimal = positions.iter().map(|p| p.staked).sum();
        assert_eq!(staked, state.total_staking_balance);

        // Every open request can still be filled from its own stake
        for position in &positions {
            assert!(position.queued_remaining() <= position.staked);
        }
        let held: Decimal = positions
            .iter()
            .flat_map(|p| p.open_requests())
            .map(|r| r.fulfilled_amount)
            .sum();
        assert_eq!(held, state.withdrawal_escrow);
        let open = positions.iter().flat_map(|p| p.open_requests()).count();
        assert_eq!(open, self.pool.queue_len());

        assert!(!self.pool.is_halted());
    }

    /// Expire every reservation and let all holds run out
    fn drain(&mut self) {
        let buyer = AccountId::from("0xbuyer");
        while let Some((premium, payoff)) = self.open.pop() {
            self.pool.release(premium, payoff, &buyer).unwrap();
        }
        self.clock.advance(10 * self.pool.unstake_lock_secs() + 1_000_000);
        self.pool.process_withdrawals().unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn invariants_hold_after_every_operation(ops in prop::collection::vec(op(), 1..60)) {
        let mut harness = Harness::new();
        for op in &ops {
            harness.apply(op);
            harness.check();
        }

        harness.drain();
        harness.check();
        prop_assert_eq!(harness.pool.queue_len(), 0);
        prop_assert_eq!(harness.pool.state().withdrawal_escrow, Decimal::ZERO);
    }

    #[test]
    fn reserve_then_release_restores_balances(
        stake in 2_000..100_000u32,
        premium in 0..100u32,
        payoff in 1..1_000u32,
    ) {
        let harness = Harness::new();
        let buyer = AccountId::from("0xbuyer");
        harness.pool.stake(&AccountId::from("0xa"), Decimal::from(stake)).unwrap();
        let before = harness.pool.state();

        harness.pool.reserve(Decimal::from(premium), Decimal::from(payoff), &buyer).unwrap();
        harness.pool.release(Decimal::from(premium), Decimal::from(payoff), &buyer).unwrap();

        let after = harness.pool.state();
        prop_assert_eq!(after.locked_balance, before.locked_balance);
        prop_assert_eq!(after.active_premiums, before.active_premiums);
    }

    #[test]
    fn unstake_limit_is_exact(stake in 10..10_000u32, locked_pct in 0..100u32) {
        let harness = Harness::new();
        let lp = AccountId::from("0xa");
        let stake = Decimal::from(stake);
        harness.pool.stake(&lp, stake).unwrap();

        let locked = (stake * Decimal::from(locked_pct) / Decimal::from(100)).floor();
        if locked > Decimal::ZERO {
            harness.pool.reserve(Decimal::ZERO, locked, &AccountId::from("0xbuyer")).unwrap();
        }

        let unlocked = harness.pool.unlocked_for(&lp);
        prop_assert_eq!(unlocked, stake - locked);

        let too_much = harness.pool.request_unstake(&lp, unlocked + Decimal::ONE);
        let is_insufficient = matches!(too_much, Err(PoolError::InsufficientUnlocked { .. }));
        prop_assert!(is_insufficient);
        if unlocked > Decimal::ZERO {
            prop_assert!(harness.pool.request_unstake(&lp, unlocked).is_ok());
        }
    }
}
