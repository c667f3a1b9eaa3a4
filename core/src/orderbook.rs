//! Order-book manager: per-symbol L2 snapshot plus a bounded mid-price
//! ring for realized-volatility estimation. Supports variable-depth
//! `Vec<OrderBookLevel>` books, rather than a fixed number of levels.

use crate::data::OrderBookLevel;
use rust_decimal::Decimal;
use std::collections::VecDeque;

const MID_RING_CAPACITY: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub timestamp_ms: u64,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some(a - b),
            _ => None,
        }
    }

    pub fn spread_bps(&self) -> Option<Decimal> {
        match (self.spread(), self.mid()) {
            (Some(s), Some(m)) if !m.is_zero() => Some(crate::decimal::fraction_to_bps(s / m)),
            _ => None,
        }
    }

    /// Invariant: bids strictly decreasing, asks strictly increasing,
    /// best_bid < best_ask.
    pub fn is_valid(&self) -> bool {
        let bids_ok = self.bids.windows(2).all(|w| w[0].price > w[1].price);
        let asks_ok = self.asks.windows(2).all(|w| w[0].price < w[1].price);
        let crossed_ok = match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b < a,
            _ => true,
        };
        bids_ok && asks_ok && crossed_ok
    }

    /// Sum of `price*qty` across levels on `side` within `bps` of mid.
    pub fn depth_within_bps(&self, side: crate::data::Side, bps: Decimal) -> Decimal {
        let Some(mid) = self.mid() else { return Decimal::ZERO };
        let band = crate::decimal::bps_to_fraction(bps) * mid;
        let levels: &[OrderBookLevel] = match side {
            crate::data::Side::Buy => &self.bids,
            crate::data::Side::Sell => &self.asks,
        };
        levels
            .iter()
            .filter(|l| (l.price - mid).abs() <= band)
            .map(|l| l.price * l.quantity)
            .sum()
    }

    pub fn total_liquidity(&self, side: crate::data::Side) -> Decimal {
        let levels: &[OrderBookLevel] = match side {
            crate::data::Side::Buy => &self.bids,
            crate::data::Side::Sell => &self.asks,
        };
        levels.iter().map(|l| l.quantity).sum()
    }
}

/// Maintains the live snapshot plus a ring of recent mids, per symbol.
pub struct OrderBookManager {
    symbol: String,
    snapshot: Option<OrderBookSnapshot>,
    mid_ring: VecDeque<Decimal>,
    last_update_ms: u64,
}

impl OrderBookManager {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            snapshot: None,
            mid_ring: VecDeque::with_capacity(MID_RING_CAPACITY),
            last_update_ms: 0,
        }
    }

    pub fn snapshot(&self) -> Option<&OrderBookSnapshot> {
        self.snapshot.as_ref()
    }

    fn push_mid(&mut self, mid: Decimal) {
        if self.mid_ring.len() == MID_RING_CAPACITY {
            self.mid_ring.pop_front();
        }
        self.mid_ring.push_back(mid);
    }

    /// Replaces the snapshot entirely.
    pub fn apply_full(&mut self, mut bids: Vec<OrderBookLevel>, mut asks: Vec<OrderBookLevel>, timestamp_ms: u64) {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        let snap = OrderBookSnapshot {
            symbol: self.symbol.clone(),
            bids,
            asks,
            timestamp_ms,
        };
        if let Some(mid) = snap.mid() {
            self.push_mid(mid);
        }
        self.last_update_ms = timestamp_ms;
        self.snapshot = Some(snap);
    }

    /// Applies an incremental diff: each entry is `(price, qty)`; `qty==0`
    /// removes the level, otherwise inserts-or-replaces. Ignored if no full
    /// snapshot has been applied yet.
    pub fn apply_diff(&mut self, bid_updates: &[(Decimal, Decimal)], ask_updates: &[(Decimal, Decimal)], timestamp_ms: u64) {
        let Some(snap) = self.snapshot.as_mut() else {
            return; // diff before any full snapshot: ignore
        };

        apply_side_diff(&mut snap.bids, bid_updates, true);
        apply_side_diff(&mut snap.asks, ask_updates, false);
        snap.timestamp_ms = timestamp_ms;

        if let Some(mid) = snap.mid() {
            self.push_mid(mid);
        }
        self.last_update_ms = timestamp_ms;
    }

    pub fn is_stale(&self, now_ms: u64, max_age_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_update_ms) > max_age_ms
    }

    /// Sample standard deviation of successive percent returns over the
    /// last `n` mids, scaled to bps. `None` if fewer than 3 points or n<3.
    pub fn realized_volatility_bps(&self, n: usize) -> Option<Decimal> {
        if n < 3 || self.mid_ring.len() < n {
            return None;
        }
        let start = self.mid_ring.len() - n;
        let window: Vec<Decimal> = self.mid_ring.iter().skip(start).copied().collect();
        let returns: Vec<Decimal> = window
            .windows(2)
            .filter(|w| !w[0].is_zero())
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        if returns.len() < 2 {
            return None;
        }
        let mean = returns.iter().sum::<Decimal>() / Decimal::from(returns.len() as u64);
        let variance = returns.iter().map(|r| (*r - mean) * (*r - mean)).sum::<Decimal>()
            / Decimal::from((returns.len() - 1) as u64);
        let std_dev = sqrt_decimal(variance);
        Some(crate::decimal::fraction_to_bps(std_dev))
    }
}

fn apply_side_diff(levels: &mut Vec<OrderBookLevel>, updates: &[(Decimal, Decimal)], is_bid: bool) {
    for &(price, qty) in updates {
        if price <= Decimal::ZERO || qty < Decimal::ZERO {
            continue; // malformed level other than the qty==0 removal sentinel
        }
        if let Some(pos) = levels.iter().position(|l| l.price == price) {
            if qty.is_zero() {
                levels.remove(pos);
            } else {
                levels[pos].quantity = qty;
            }
        } else if !qty.is_zero() {
            levels.push(OrderBookLevel { price, quantity: qty });
        }
    }
    if is_bid {
        levels.sort_by(|a, b| b.price.cmp(&a.price));
    } else {
        levels.sort_by(|a, b| a.price.cmp(&b.price));
    }
}

/// Babylonian-method square root for `Decimal` (no native `sqrt` in
/// `rust_decimal` for non-negative fixed-point values at arbitrary scale).
pub(crate) fn sqrt_decimal(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let mut guess = value;
    for _ in 0..64 {
        let next = (guess + value / guess) / Decimal::TWO;
        if (next - guess).abs() < Decimal::new(1, 12) {
            return next;
        }
        guess = next;
    }
    guess
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn side_from_offsets(base: Decimal, offsets: &[i64], away_from_base: impl Fn(Decimal, Decimal) -> Decimal) -> Vec<OrderBookLevel> {
        let mut price = base;
        offsets
            .iter()
            .map(|&o| {
                price = away_from_base(price, Decimal::from(o));
                OrderBookLevel { price, quantity: Decimal::ONE }
            })
            .collect()
    }

    proptest! {
        /// Property: whatever combination of bid/ask levels `apply_full`
        /// receives, the resulting snapshot has bids strictly decreasing,
        /// asks strictly increasing, and best_bid < best_ask.
        #[test]
        fn full_replacement_always_yields_a_valid_snapshot(
            base in 1_000i64..2_000_000i64,
            bid_steps in prop::collection::vec(1i64..10_000, 0..8),
            ask_steps in prop::collection::vec(1i64..10_000, 0..8),
            ts in 0u64..1_000_000,
        ) {
            let base = Decimal::from(base);
            let bids = side_from_offsets(base, &bid_steps, |p, o| p - o);
            let asks = side_from_offsets(base, &ask_steps, |p, o| p + o);

            let mut mgr = OrderBookManager::new("BTC-PERP");
            mgr.apply_full(bids, asks, ts);

            prop_assert!(mgr.snapshot().unwrap().is_valid());
        }

        /// Property: a snapshot that was valid before a diff is still valid
        /// after it, for any mix of inserts, replacements and zero-qty
        /// removals at arbitrary (possibly repeated) prices.
        #[test]
        fn diff_preserves_validity(
            base in 1_000i64..2_000_000i64,
            bid_steps in prop::collection::vec(1i64..10_000, 1..8),
            ask_steps in prop::collection::vec(1i64..10_000, 1..8),
            bid_diff_prices in prop::collection::vec(-5_000i64..1, 0..8),
            bid_diff_qtys in prop::collection::vec(0i64..5, 0..8),
            ask_diff_prices in prop::collection::vec(1i64..5_000, 0..8),
            ask_diff_qtys in prop::collection::vec(0i64..5, 0..8),
            ts in 0u64..1_000_000,
        ) {
            let base = Decimal::from(base);
            let bids = side_from_offsets(base, &bid_steps, |p, o| p - o);
            let asks = side_from_offsets(base, &ask_steps, |p, o| p + o);

            let mut mgr = OrderBookManager::new("BTC-PERP");
            mgr.apply_full(bids, asks, ts);
            prop_assert!(mgr.snapshot().unwrap().is_valid());

            let bid_updates: Vec<(Decimal, Decimal)> = bid_diff_prices
                .iter()
                .zip(bid_diff_qtys.iter())
                .map(|(&p, &q)| (base + Decimal::from(p), Decimal::from(q)))
                .collect();
            let ask_updates: Vec<(Decimal, Decimal)> = ask_diff_prices
                .iter()
                .zip(ask_diff_qtys.iter())
                .map(|(&p, &q)| (base + Decimal::from(p), Decimal::from(q)))
                .collect();

            mgr.apply_diff(&bid_updates, &ask_updates, ts + 1);

            prop_assert!(mgr.snapshot().unwrap().is_valid());
        }
    }
}
