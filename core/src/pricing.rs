//! Pricing engine: spread + inventory skew + volatility/depth adjustments,
//! merged into a single integrated algorithm that produces a bid/ask quote
//! pair from a book snapshot, a risk-scaling factor and current inventory.

use crate::data::Quote;
use crate::decimal::{bps_to_fraction, round_down_to_tick, round_up_to_tick};
use crate::orderbook::OrderBookSnapshot;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy)]
pub struct PricingParams {
    pub base_spread_bps: Decimal,
    pub min_spread_bps: Decimal,
    pub max_spread_bps: Decimal,
    pub vol_spread_factor: Decimal,
    pub inventory_skew_strength: Decimal,
    pub max_inventory_notional_pct: Decimal,
    pub tick_size: Decimal,
    /// Basis points added when total depth is below `shallow_depth_notional`.
    pub shallow_widen_bps: Decimal,
    pub shallow_depth_notional: Decimal,
}

pub struct PricingEngine {
    pub params: PricingParams,
}

impl PricingEngine {
    pub fn new(params: PricingParams) -> Self {
        Self { params }
    }

    /// Produces a quote from the current book, inventory and optional
    /// volatility/depth inputs. Returns `None` if no mid is available.
    pub fn compute_quote(
        &self,
        snapshot: &OrderBookSnapshot,
        inventory_qty: Decimal,
        vol_bps: Option<Decimal>,
        depth_bid: Option<Decimal>,
        depth_ask: Option<Decimal>,
        timestamp_ms: u64,
    ) -> Option<Quote> {
        let mid = snapshot.mid()?;
        let p = &self.params;

        let mut spread_bps = p.base_spread_bps;
        if let Some(vol) = vol_bps {
            spread_bps += vol * p.vol_spread_factor;
        }

        if let (Some(bid_depth), Some(ask_depth)) = (depth_bid, depth_ask) {
            let total = bid_depth + ask_depth;
            if total < p.shallow_depth_notional {
                spread_bps += p.shallow_widen_bps;
            }
            if !total.is_zero() {
                spread_bps += (bid_depth - ask_depth).abs() / total * Decimal::TEN;
            }
        }

        spread_bps = spread_bps.clamp(p.min_spread_bps, p.max_spread_bps);

        // Inventory skew: long skews mid down (encourages sells), short up.
        let skew_pct = -(inventory_qty / (crate::decimal::HUNDRED * p.max_inventory_notional_pct))
            * p.inventory_skew_strength
            * Decimal::new(1, 2); // * 0.01
        let skewed_mid = mid * (Decimal::ONE + skew_pct);

        let mut half = skewed_mid * bps_to_fraction(spread_bps) / Decimal::TWO;
        if half.is_zero() {
            half = p.tick_size;
        }

        let mut bid = round_down_to_tick(skewed_mid - half, p.tick_size);
        let mut ask = round_up_to_tick(skewed_mid + half, p.tick_size);

        // If clamping collapsed the half-spread below a tick, widen by one tick each side.
        if bid >= ask {
            bid -= p.tick_size;
            ask += p.tick_size;
        }

        Some(Quote {
            bid_price: bid,
            bid_size: Decimal::ZERO,
            ask_price: ask,
            ask_size: Decimal::ZERO,
            timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::OrderBookLevel;
    use rust_decimal_macros::dec;

    fn default_params() -> PricingParams {
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

    fn book(mid_bid: Decimal, mid_ask: Decimal) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: "BTC-PERP".into(),
            bids: vec![OrderBookLevel { price: mid_bid, quantity: dec!(1) }],
            asks: vec![OrderBookLevel { price: mid_ask, quantity: dec!(1) }],
            timestamp_ms: 0,
        }
    }

    #[test]
    fn quote_is_valid_and_on_tick_grid() {
        let engine = PricingEngine::new(default_params());
        let snap = book(dec!(49900), dec!(50100));
        let q = engine.compute_quote(&snap, Decimal::ZERO, None, None, None, 0).unwrap();
        assert!(q.bid_price < q.ask_price);
        assert_eq!((q.bid_price / dec!(0.01)).fract(), Decimal::ZERO);
        assert_eq!((q.ask_price / dec!(0.01)).fract(), Decimal::ZERO);
    }

    #[test]
    fn long_inventory_skews_mid_down() {
        let engine = PricingEngine::new(default_params());
        let snap = book(dec!(49900), dec!(50100));
        let neutral = engine.compute_quote(&snap, Decimal::ZERO, None, None, None, 0).unwrap();
        let long = engine.compute_quote(&snap, dec!(0.1), None, None, None, 0).unwrap();
        assert!(long.bid_price < neutral.bid_price);
        assert!(long.ask_price < neutral.ask_price);
    }

    #[test]
    fn spread_clamps_to_max() {
        let engine = PricingEngine::new(default_params());
        let snap = book(dec!(49900), dec!(50100));
        let q = engine.compute_quote(&snap, Decimal::ZERO, Some(dec!(1000)), None, None, 0).unwrap();
        let mid = snap.mid().unwrap();
        let observed_spread_bps = (q.ask_price - q.bid_price) / mid * dec!(10000);
        assert!(observed_spread_bps <= dec!(30) + dec!(1)); // allow 1 tick rounding slack
    }
}
