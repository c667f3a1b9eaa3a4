//! Metrics & journaling: point-in-time `SystemSnapshot` aggregation plus
//! the Sharpe/drawdown/cancel-ratio statistics derived from it. The
//! CSV/Markdown journal lives in [`crate::journal`]. A `prometheus`
//! registry exposes the same numbers for scraping, under one namespace
//! with per-family registration.

use crate::data::PnLState;
use crate::market_maker::SharedAccountState;
use crate::orderbook::sqrt_decimal;
use prometheus::{IntCounter, IntGauge, Opts, Registry};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A point-in-time aggregate of account state, for the `status` command
/// and periodic metrics export.
#[derive(Debug, Clone)]
pub struct SystemSnapshot {
    pub timestamp_ms: u64,
    pub equity: Decimal,
    pub pnl: PnLState,
    pub open_orders_per_symbol: HashMap<String, usize>,
    pub total_trades: u64,
    pub trades_today: u64,
    pub total_cancels: u64,
    pub cancel_to_trade_ratio: Option<Decimal>,
    pub peak_equity: Decimal,
    pub max_drawdown_abs: Decimal,
    pub max_drawdown_pct: Decimal,
    pub sharpe: Option<Decimal>,
    pub kill_switch_active: bool,
    pub kill_switch_reason: Option<String>,
}

/// `sharpe = (mean·periods_per_year − rf) / (stdev·√periods_per_year)`.
/// Undefined (`None`) for fewer than 2 samples or zero variance.
pub fn sharpe_ratio(trade_pnls: &[Decimal], periods_per_year: Decimal, risk_free_rate: Decimal) -> Option<Decimal> {
    if trade_pnls.len() < 2 {
        return None;
    }
    let n = Decimal::from(trade_pnls.len() as u64);
    let mean = trade_pnls.iter().sum::<Decimal>() / n;
    let variance = trade_pnls.iter().map(|p| (*p - mean) * (*p - mean)).sum::<Decimal>() / (n - Decimal::ONE);
    if variance.is_zero() {
        return None;
    }
    let std_dev = sqrt_decimal(variance);
    let annualized_std = std_dev * sqrt_decimal(periods_per_year);
    if annualized_std.is_zero() {
        return None;
    }
    Some((mean * periods_per_year - risk_free_rate) / annualized_std)
}

/// Running-peak drawdown over an equity series: returns `(absolute, pct)`.
pub fn max_drawdown(equity_series: &[(u64, Decimal)]) -> (Decimal, Decimal) {
    let mut peak = Decimal::ZERO;
    let mut max_abs = Decimal::ZERO;
    let mut max_pct = Decimal::ZERO;
    for &(_, equity) in equity_series {
        if equity > peak {
            peak = equity;
        }
        let dd = peak - equity;
        if dd > max_abs {
            max_abs = dd;
        }
        if peak > Decimal::ZERO {
            let pct = dd / peak;
            if pct > max_pct {
                max_pct = pct;
            }
        }
    }
    (max_abs, max_pct)
}

/// `cancels / trades`; undefined when `trades == 0`.
pub fn cancel_to_trade_ratio(cancels: u64, trades: u64) -> Option<Decimal> {
    if trades == 0 {
        None
    } else {
        Some(Decimal::from(cancels) / Decimal::from(trades))
    }
}

/// Assembles a [`SystemSnapshot`] from the shared account state plus the
/// per-symbol counters each `MarketMaker` exposes. `window_hours` bounds
/// the Sharpe computation; `periods_per_year` annualizes it (e.g.
/// `365.0*24.0*3600.0/refresh_interval_secs` for a tick-level Sharpe, or
/// `365` for a daily one — the caller decides the sampling convention).
#[allow(clippy::too_many_arguments)]
pub fn build_snapshot(
    account: &SharedAccountState,
    now_ms: u64,
    window_hours: u64,
    periods_per_year: Decimal,
    risk_free_rate: Decimal,
    open_orders_per_symbol: HashMap<String, usize>,
    total_trades: u64,
    total_cancels: u64,
    kill_switch_active: bool,
    kill_switch_reason: Option<String>,
) -> SystemSnapshot {
    let pnl = account.pnl_snapshot();
    let since_ms = now_ms.saturating_sub(window_hours.saturating_mul(3_600_000));
    let windowed_pnls = account.trade_pnls_since(since_ms);
    let sharpe = sharpe_ratio(&windowed_pnls, periods_per_year, risk_free_rate);
    let (max_dd_abs, max_dd_pct) = max_drawdown(&account.equity_series());
    let trades_today = pnl.daily_trades;

    SystemSnapshot {
        timestamp_ms: now_ms,
        equity: pnl.current_equity,
        peak_equity: pnl.peak_equity,
        pnl,
        open_orders_per_symbol,
        total_trades,
        trades_today,
        total_cancels,
        cancel_to_trade_ratio: cancel_to_trade_ratio(total_cancels, total_trades),
        max_drawdown_abs: max_dd_abs,
        max_drawdown_pct: max_dd_pct,
        sharpe,
        kill_switch_active,
        kill_switch_reason,
    }
}

/// Prometheus exposition for dashboards/alerting. Registration failure is
/// treated as fatal startup infrastructure.
pub struct MetricsRegistry {
    registry: Registry,
    pub equity: IntGauge,
    pub drawdown_pct_bps: IntGauge,
    pub trades_total: IntCounter,
    pub cancels_total: IntCounter,
    pub kill_switch_active: IntGauge,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let equity = IntGauge::with_opts(Opts::new("marlin_equity_cents", "Current account equity, in cents"))?;
        let drawdown_pct_bps = IntGauge::with_opts(Opts::new("marlin_drawdown_bps", "Current drawdown from peak equity, in bps"))?;
        let trades_total = IntCounter::with_opts(Opts::new("marlin_trades_total", "Total trades observed"))?;
        let cancels_total = IntCounter::with_opts(Opts::new("marlin_cancels_total", "Total cancel requests sent"))?;
        let kill_switch_active = IntGauge::with_opts(Opts::new("marlin_kill_switch_active", "1 if the kill-switch is latched"))?;

        registry.register(Box::new(equity.clone()))?;
        registry.register(Box::new(drawdown_pct_bps.clone()))?;
        registry.register(Box::new(trades_total.clone()))?;
        registry.register(Box::new(cancels_total.clone()))?;
        registry.register(Box::new(kill_switch_active.clone()))?;

        info!("metrics registry initialized");

        Ok(Self { registry, equity, drawdown_pct_bps, trades_total, cancels_total, kill_switch_active })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Updates the gauges from a freshly built snapshot. Counters are
    /// advanced incrementally by callers as events occur, not here.
    pub fn observe(&self, snapshot: &SystemSnapshot) {
        if let Some(cents) = snapshot.equity.round_dp(2).checked_mul(Decimal::from(100u32)).and_then(|d| d.to_string().parse::<i64>().ok()) {
            self.equity.set(cents);
        }
        let bps = (snapshot.max_drawdown_pct * Decimal::from(10_000u32)).to_string().parse::<i64>().unwrap_or(0);
        self.drawdown_pct_bps.set(bps);
        self.kill_switch_active.set(if snapshot.kill_switch_active { 1 } else { 0 });
    }
}

impl MetricsRegistry {
    /// Convenience constructor for callers that want a shared handle and
    /// accept the panic-on-init-failure policy above.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new().unwrap_or_else(|e| {
            tracing::error!("failed to create metrics registry: {}", e);
            panic!("cannot start without a metrics registry");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sharpe_undefined_below_two_samples() {
        assert!(sharpe_ratio(&[dec!(1)], dec!(252), Decimal::ZERO).is_none());
        assert!(sharpe_ratio(&[], dec!(252), Decimal::ZERO).is_none());
    }

    #[test]
    fn sharpe_undefined_on_zero_variance() {
        let pnls = vec![dec!(1), dec!(1), dec!(1)];
        assert!(sharpe_ratio(&pnls, dec!(252), Decimal::ZERO).is_none());
    }

    #[test]
    fn sharpe_positive_when_mean_positive() {
        let pnls = vec![dec!(1), dec!(2), dec!(-0.5), dec!(1.5)];
        let sharpe = sharpe_ratio(&pnls, dec!(252), Decimal::ZERO).unwrap();
        assert!(sharpe > Decimal::ZERO);
    }

    #[test]
    fn max_drawdown_tracks_running_peak() {
        let series = vec![(0, dec!(1000)), (1, dec!(1100)), (2, dec!(990)), (3, dec!(1050))];
        let (abs, pct) = max_drawdown(&series);
        assert_eq!(abs, dec!(110));
        assert!(pct > dec!(0.09) && pct < dec!(0.11));
    }

    #[test]
    fn cancel_to_trade_ratio_undefined_with_no_trades() {
        assert!(cancel_to_trade_ratio(5, 0).is_none());
        assert_eq!(cancel_to_trade_ratio(10, 5), Some(dec!(2)));
    }

    #[test]
    fn build_snapshot_aggregates_equity_and_drawdown() {
        let account = SharedAccountState::new(dec!(200), 0);
        let mut pos = crate::data::Position::flat("BTC-PERP", 0);
        let realized = pos.apply_fill(crate::data::Side::Buy, dec!(50100), dec!(0.001), dec!(50100), 1);
        account.report_fill(pos, realized, dec!(50.1), Decimal::ZERO, true);

        let snapshot = build_snapshot(&account, 2, 24, dec!(252), Decimal::ZERO, HashMap::new(), 1, 0, false, None);
        assert_eq!(snapshot.total_trades, 1);
        assert!(snapshot.cancel_to_trade_ratio.is_some());
        assert!(!snapshot.kill_switch_active);
    }
}
