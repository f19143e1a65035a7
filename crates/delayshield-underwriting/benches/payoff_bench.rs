//! Underwriting benchmarks
//!
//! - payoff schedule evaluation
//! - application intake (signature check plus pool reservation)

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use delayshield_common::{
    AccountId, ApplicationMessage, DelayShieldConfig, ManualClock, QuoteSigner, SignableFields,
};
use delayshield_underwriting::{ChannelOracle, DelayShield, PayoffSchedule, PolicyApplication};
use rust_decimal::Decimal;

// ============ PAYOFF BENCHMARKS ============

fn bench_settle(c: &mut Criterion) {
    let schedule = PayoffSchedule::default();
    let payoff = Decimal::from(500);

    c.bench_function("payoff/settle_table", |b| {
        b.iter(|| {
            for delay in [0, 45, 90, 200, 400, 500] {
                black_box(schedule.settle(black_box(delay), payoff));
            }
        })
    });
}

// ============ APPLICATION BENCHMARKS ============

fn bench_new_application(c: &mut Criterion) {
    let start = 1_700_000_000;
    let clock = ManualClock::new(start);
    let (oracle, _requests) = ChannelOracle::new(16);
    let owner = AccountId::from("0xowner");
    let (shield, _registry) = DelayShield::in_memory(
        DelayShieldConfig::default(),
        owner.clone(),
        Arc::new(clock),
        Arc::new(oracle),
    )
    .expect("default config is valid");

    let signer = QuoteSigner::generate();
    shield
        .authorizer
        .add_signer(&owner, signer.signer_id())
        .expect("owner adds signer");
    shield
        .pool
        .stake(&AccountId::from("0xlp"), Decimal::from(1_000_000_000))
        .expect("stake");

    let buyer = AccountId::from("0xbuyer");
    let deadline = start + 3_600;
    let signature = signer.sign(&SignableFields::Application(ApplicationMessage {
        flight_number: "LH400".into(),
        buyer: buyer.clone(),
        premium: Decimal::from(10),
        deadline,
    }));
    let application = PolicyApplication {
        buyer,
        product_id: "delay-basic".into(),
        flight_number: "LH400".into(),
        premium: Decimal::from(10),
        payoff: Decimal::from(500),
        departure_date: start + 2 * 86_400,
        landing_date: start + 2 * 86_400 + 10_800,
        deadline,
        signature,
    };

    c.bench_function("underwriting/new_application", |b| {
        b.iter_batched(
            || application.clone(),
            |app| shield.manager.new_application(app),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_settle, bench_new_application);
criterion_main!(benches);
