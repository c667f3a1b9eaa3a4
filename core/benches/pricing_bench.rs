use criterion::{black_box, criterion_group, criterion_main, Criterion};
use marlin_core::data::OrderBookLevel;
use marlin_core::orderbook::OrderBookSnapshot;
use marlin_core::pricing::{PricingEngine, PricingParams};
use rust_decimal_macros::dec;

fn book() -> OrderBookSnapshot {
    OrderBookSnapshot {
        symbol: "BTC-PERP".into(),
        bids: vec![OrderBookLevel { price: dec!(49900), quantity: dec!(1.5) }],
        asks: vec![OrderBookLevel { price: dec!(50100), quantity: dec!(1.5) }],
        timestamp_ms: 0,
    }
}

fn params() -> PricingParams {
    PricingParams {
        base_spread_bps: dec!(8),
        min_spread_bps: dec!(4),
        max_spread_bps: dec!(30),
        vol_spread_factor: dec!(1),
        inventory_skew_strength: dec!(1.2),
        max_inventory_notional_pct: dec!(0.30),
        tick_size: dec!(0.01),
        shallow_widen_bps: dec!(2),
        shallow_depth_notional: dec!(1000),
    }
}

fn bench_compute_quote(c: &mut Criterion) {
    let engine = PricingEngine::new(params());
    let snap = book();
    c.bench_function("pricing::compute_quote", |b| {
        b.iter(|| {
            black_box(engine.compute_quote(
                black_box(&snap),
                black_box(dec!(0.05)),
                black_box(Some(dec!(40))),
                black_box(Some(dec!(5000))),
                black_box(Some(dec!(4800))),
                black_box(0),
            ))
        })
    });
}

criterion_group!(benches, bench_compute_quote);
criterion_main!(benches);
