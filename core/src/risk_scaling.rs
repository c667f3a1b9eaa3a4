//! Risk scaling engine: a Wilder ATR over OHLC bars plus a bounded
//! rolling-drawdown window feed a risk multiplier in `[risk_min, risk_max]`,
//! from which spread and refresh-frequency multipliers are derived.

use rust_decimal::Decimal;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
pub struct Bar {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskScalingParams {
    pub atr_length: usize,
    pub dd_lookback_hours: u64,
    pub vol_low: Decimal,
    pub vol_high: Decimal,
    pub dd_soft: Decimal,
    pub dd_hard: Decimal,
    pub risk_min: Decimal,
    pub risk_max: Decimal,
    pub risk_off_threshold: Decimal,
}

impl RiskScalingParams {
    fn bar_window(&self) -> usize {
        self.atr_length * 3
    }
}

/// Computed multipliers for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct RiskMultipliers {
    pub vol_mult: Decimal,
    pub dd_mult: Decimal,
    pub risk_mult: Decimal,
    pub spread_mult: Decimal,
    pub freq_mult: Decimal,
    pub is_risk_off: bool,
}

pub struct RiskScalingEngine {
    params: RiskScalingParams,
    bars: VecDeque<Bar>,
    prev_close: Option<Decimal>,
    atr: Option<Decimal>,
    equity_series: VecDeque<(u64, Decimal)>,
}

impl RiskScalingEngine {
    pub fn new(params: RiskScalingParams) -> Self {
        Self {
            params,
            bars: VecDeque::with_capacity(params.bar_window()),
            prev_close: None,
            atr: None,
            equity_series: VecDeque::new(),
        }
    }

    /// Feeds one OHLC bar and updates the Wilder-style ATR.
    pub fn add_bar(&mut self, bar: Bar) {
        if self.bars.len() == self.params.bar_window() {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);

        let tr = match self.prev_close {
            Some(prev) => {
                let r1 = bar.high - bar.low;
                let r2 = (bar.high - prev).abs();
                let r3 = (bar.low - prev).abs();
                r1.max(r2).max(r3)
            }
            None => bar.high - bar.low,
        };
        self.prev_close = Some(bar.close);

        let n = self.params.atr_length;
        if n == 0 {
            return;
        }

        match self.atr {
            None if self.bars.len() >= n => {
                // Seed ATR with the simple average of the true ranges over the
                // first full window (recomputed from stored bars).
                let mut prev: Option<Decimal> = None;
                let mut sum = Decimal::ZERO;
                let mut count = 0u32;
                for b in self.bars.iter().rev().take(n).collect::<Vec<_>>().into_iter().rev() {
                    let tr_i = match prev {
                        Some(p) => (b.high - b.low).max((b.high - p).abs()).max((b.low - p).abs()),
                        None => b.high - b.low,
                    };
                    sum += tr_i;
                    count += 1;
                    prev = Some(b.close);
                }
                if count > 0 {
                    self.atr = Some(sum / Decimal::from(count));
                }
            }
            Some(prev_atr) => {
                let n_dec = Decimal::from(n as u64);
                self.atr = Some((prev_atr * (n_dec - Decimal::ONE) + tr) / n_dec);
            }
            None => {}
        }
    }

    /// Records an equity observation, pruning to the configured lookback.
    pub fn observe_equity(&mut self, equity: Decimal, now_ms: u64) {
        self.equity_series.push_back((now_ms, equity));
        let lookback_ms = self.params.dd_lookback_hours.saturating_mul(3_600_000);
        while let Some(&(ts, _)) = self.equity_series.front() {
            if now_ms.saturating_sub(ts) > lookback_ms {
                self.equity_series.pop_front();
            } else {
                break;
            }
        }
    }

    /// Maximum running-peak drawdown fraction observed within the window.
    pub fn window_drawdown(&self) -> Decimal {
        let mut peak = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;
        for &(_, equity) in &self.equity_series {
            if equity > peak {
                peak = equity;
            }
            if peak > Decimal::ZERO {
                let dd = (peak - equity) / peak;
                if dd > max_dd {
                    max_dd = dd;
                }
            }
        }
        max_dd
    }

    fn vol_multiplier(&self, price: Decimal) -> Decimal {
        let Some(atr) = self.atr else { return Decimal::ONE };
        if price.is_zero() {
            return Decimal::ONE;
        }
        let atr_pct = atr / price * crate::decimal::HUNDRED;
        let p = &self.params;
        if atr_pct < p.vol_low {
            Decimal::new(15, 1) // 1.5
        } else if atr_pct > p.vol_high {
            Decimal::new(5, 1) // 0.5
        } else {
            let span = p.vol_high - p.vol_low;
            if span.is_zero() {
                return Decimal::new(15, 1);
            }
            let t = (atr_pct - p.vol_low) / span;
            Decimal::new(15, 1) - t * Decimal::ONE // 1.5 down to 0.5
        }
    }

    fn dd_multiplier(&self, dd: Decimal) -> Decimal {
        let p = &self.params;
        if dd <= p.dd_soft {
            Decimal::ONE
        } else if dd >= p.dd_hard {
            Decimal::new(1, 1) // 0.1
        } else {
            let span = p.dd_hard - p.dd_soft;
            if span.is_zero() {
                return Decimal::new(1, 1);
            }
            let t = (dd - p.dd_soft) / span;
            Decimal::ONE - t * (Decimal::ONE - Decimal::new(1, 1))
        }
    }

    /// Computes the current risk multiplier and its derived spread/
    /// frequency multipliers for `price`.
    pub fn compute_risk_multiplier(&self, price: Decimal) -> RiskMultipliers {
        let vol_mult = self.vol_multiplier(price);
        let dd = self.window_drawdown();
        let dd_mult = self.dd_multiplier(dd);

        let risk_mult = (vol_mult * dd_mult).clamp(self.params.risk_min, self.params.risk_max);

        let spread_mult = (Decimal::ONE + (Decimal::ONE - risk_mult)).clamp(Decimal::ONE, Decimal::from(3u32));
        let freq_mult = if risk_mult < Decimal::ONE {
            Decimal::ONE + (Decimal::ONE - risk_mult) * Decimal::TWO
        } else {
            Decimal::ONE
        };

        let is_risk_off = risk_mult < self.params.risk_off_threshold;

        RiskMultipliers {
            vol_mult,
            dd_mult,
            risk_mult,
            spread_mult,
            freq_mult,
            is_risk_off,
        }
    }

    pub fn atr(&self) -> Option<Decimal> {
        self.atr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> RiskScalingParams {
        RiskScalingParams {
            atr_length: 5,
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

    #[test]
    fn drawdown_multiplier_monotonically_decreases_with_drawdown() {
        let engine = RiskScalingEngine::new(params());
        let m1 = engine.dd_multiplier(dec!(0.05));
        let m2 = engine.dd_multiplier(dec!(0.10));
        let m3 = engine.dd_multiplier(dec!(0.20));
        assert!(m1 >= m2);
        assert!(m2 >= m3);
    }

    #[test]
    fn vol_multiplier_monotonically_decreases_past_vol_high() {
        let mut engine = RiskScalingEngine::new(params());
        for i in 0..10 {
            engine.add_bar(Bar { high: dec!(100) + Decimal::from(i), low: dec!(99), close: dec!(99.5) });
        }
        let m_low = engine.vol_multiplier(dec!(10000)); // tiny atr_pct
        assert_eq!(m_low, dec!(1.5));
    }

    #[test]
    fn window_drawdown_tracks_running_peak() {
        let mut engine = RiskScalingEngine::new(params());
        engine.observe_equity(dec!(1000), 0);
        engine.observe_equity(dec!(1100), 1);
        engine.observe_equity(dec!(990), 2); // dd = (1100-990)/1100 = 0.1
        let dd = engine.window_drawdown();
        assert!(dd > dec!(0.09) && dd < dec!(0.11));
    }

    #[test]
    fn equity_series_prunes_outside_lookback() {
        let mut engine = RiskScalingEngine::new(params());
        engine.observe_equity(dec!(1000), 0);
        engine.observe_equity(dec!(1000), 24 * 3_600_000 + 1);
        assert_eq!(engine.equity_series.len(), 1);
    }

    #[test]
    fn risk_off_below_threshold() {
        let mut params = params();
        params.risk_min = dec!(0.0);
        let mut engine = RiskScalingEngine::new(params);
        engine.observe_equity(dec!(1000), 0);
        engine.observe_equity(dec!(700), 1); // 30% drawdown -> dd_mult 0.1
        let mults = engine.compute_risk_multiplier(dec!(50000));
        assert!(mults.is_risk_off);
    }
}
