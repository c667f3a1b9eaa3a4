use criterion::{black_box, criterion_group, criterion_main, Criterion};
use marlin_core::risk_scaling::{Bar, RiskScalingEngine, RiskScalingParams};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn params() -> RiskScalingParams {
    RiskScalingParams {
        atr_length: 14,
        dd_lookback_hours: 24,
        vol_low: dec!(0.1),
        vol_high: dec!(1.0),
        dd_soft: dec!(0.05),
        dd_hard: dec!(0.20),
        risk_min: dec!(0.1),
        risk_max: dec!(1.5),
        risk_off_threshold: dec!(0.3),
    }
}

fn bench_add_bar_and_compute_multiplier(c: &mut Criterion) {
    let mut engine = RiskScalingEngine::new(params());
    let mut price = dec!(50000);
    for i in 0..100u64 {
        let drift = Decimal::from(i % 5);
        engine.add_bar(Bar { high: price + drift, low: price - drift, close: price });
        engine.observe_equity(dec!(1000) - Decimal::from(i % 10), i * 3_600_000);
        price += dec!(1);
    }

    c.bench_function("risk_scaling::add_bar_and_compute_risk_multiplier", |b| {
        b.iter(|| {
            engine.add_bar(black_box(Bar { high: price + dec!(2), low: price - dec!(2), close: price }));
            black_box(engine.compute_risk_multiplier(black_box(price)))
        })
    });
}

criterion_group!(benches, bench_add_bar_and_compute_multiplier);
criterion_main!(benches);
