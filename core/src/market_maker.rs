//! Market-maker event loop: one instance per symbol, owning references to
//! the pricing engine, inventory manager, risk guardian, a private
//! risk-scaling engine and order-book manager, and a symbol-scoped view of
//! the exchange client.
//!
//! Runs as a plain async per-symbol task: tick / fill / book-update
//! dispatch, a `run`/`stop` lifecycle, and a pre-trade validation gate
//! checked before every order goes out.

use crate::alerts::AlertManager;
use crate::clock::Clock;
use crate::data::{Order, PnLState, Position, Side};
use crate::errors::EngineError;
use crate::exchange::ExchangeClient;
use crate::inventory::InventoryManager;
use crate::journal::Journal;
use crate::orderbook::OrderBookManager;
use crate::pricing::PricingEngine;
use crate::rate_limiter::RateLimiter;
use crate::risk_guardian::{RiskGuardian, ToxicityAction, ToxicityResult};
use crate::risk_scaling::{Bar, RiskScalingEngine};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Bound on the per-trade PnL and equity history rings.
const HISTORY_CAPACITY: usize = 10_000;

/// Account-wide position mirror and PnL state, shared by every symbol's
/// market-maker task. Equity is the single authoritative source of PnL:
/// `initial_equity + Σ(realized + unrealized)` summed across every
/// symbol's position. Also retains bounded history used by
/// `metrics::sharpe_ratio` / `metrics::max_drawdown`.
pub struct SharedAccountState {
    positions: DashMap<String, Position>,
    pnl: Mutex<PnLState>,
    trade_pnl_history: Mutex<VecDeque<(u64, Decimal)>>,
    equity_history: Mutex<VecDeque<(u64, Decimal)>>,
}

impl SharedAccountState {
    pub fn new(initial_equity: Decimal, now_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            positions: DashMap::new(),
            pnl: Mutex::new(PnLState::new(initial_equity, now_ms)),
            trade_pnl_history: Mutex::new(VecDeque::new()),
            equity_history: Mutex::new(VecDeque::new()),
        })
    }

    pub fn position(&self, symbol: &str) -> Position {
        self.positions.get(symbol).map(|p| p.clone()).unwrap_or_else(|| Position::flat(symbol, 0))
    }

    pub fn positions_snapshot(&self) -> Vec<Position> {
        self.positions.iter().map(|e| e.value().clone()).collect()
    }

    fn recompute_equity(&self, timestamp_ms: u64) {
        let total: Decimal = self.positions.iter().map(|p| p.realized_pnl + p.unrealized_pnl).sum();
        let equity = {
            let mut pnl = self.pnl.lock();
            let equity = pnl.initial_equity + total;
            pnl.update_equity(equity);
            equity
        };
        let mut history = self.equity_history.lock();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back((timestamp_ms, equity));
    }

    /// Records a fill's resulting position and its realized-PnL/fee impact.
    pub fn report_fill(&self, position: Position, realized_pnl: Decimal, notional: Decimal, fee: Decimal, is_maker: bool) {
        let timestamp_ms = position.timestamp_ms;
        self.positions.insert(position.symbol.clone(), position);
        {
            let mut pnl = self.pnl.lock();
            pnl.record_trade(realized_pnl, notional, fee, is_maker);
        }
        if !realized_pnl.is_zero() {
            let mut history = self.trade_pnl_history.lock();
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back((timestamp_ms, realized_pnl));
        }
        self.recompute_equity(timestamp_ms);
    }

    /// Marks a position without a fill (e.g. a fresh mid).
    pub fn mark_position(&self, position: Position) {
        let timestamp_ms = position.timestamp_ms;
        self.positions.insert(position.symbol.clone(), position);
        self.recompute_equity(timestamp_ms);
    }

    pub fn equity(&self) -> Decimal {
        self.pnl.lock().current_equity
    }

    pub fn pnl_snapshot(&self) -> PnLState {
        self.pnl.lock().clone()
    }

    pub fn reset_daily(&self, now_ms: u64) {
        self.pnl.lock().reset_daily(now_ms);
    }

    /// Per-trade realized PnL observed at or after `since_ms`, oldest first.
    pub fn trade_pnls_since(&self, since_ms: u64) -> Vec<Decimal> {
        self.trade_pnl_history.lock().iter().filter(|(ts, _)| *ts >= since_ms).map(|(_, pnl)| *pnl).collect()
    }

    /// Full bounded equity history, oldest first.
    pub fn equity_series(&self) -> Vec<(u64, Decimal)> {
        self.equity_history.lock().iter().copied().collect()
    }
}

/// Visibility-only signal derived from toxicity state, spread and
/// inventory; never alters execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSignal {
    None,
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
}

#[derive(Debug, Clone)]
pub struct MarketMakerConfig {
    pub symbol: String,
    pub refresh_interval_ms: u64,
    pub time_refresh_threshold_secs: u64,
    pub price_change_trigger_bps: Decimal,
    pub forced_refresh_drift_bps: Decimal,
    pub reconcile_tolerance_bps: Decimal,
    pub depth_band_bps: Decimal,
    pub base_notional_per_side: Decimal,
    pub min_order_notional: Decimal,
    pub max_order_notional_pct: Decimal,
    pub cancel_all_timeout_secs: u64,
    pub max_cancel_to_trade_ratio: Decimal,
}

/// One instance per symbol. Owns the order-book and risk-scaling state
/// for that symbol exclusively; the pricing engine, inventory manager and
/// risk guardian are shared (`Arc`) across every symbol's instance.
pub struct MarketMaker {
    config: MarketMakerConfig,
    pricing: Arc<PricingEngine>,
    inventory: Arc<InventoryManager>,
    guardian: Arc<RiskGuardian>,
    order_rate_limiter: Arc<RateLimiter>,
    cancel_rate_limiter: Arc<RateLimiter>,
    exchange: Arc<dyn ExchangeClient>,
    clock: Arc<dyn Clock>,
    account: Arc<SharedAccountState>,

    orderbook: Mutex<OrderBookManager>,
    risk_scaling: Mutex<RiskScalingEngine>,
    last_quoted_mid: Mutex<Option<Decimal>>,
    last_refresh_mid: Mutex<Option<Decimal>>,
    last_trade_signal: Mutex<TradeSignal>,
    freq_mult: Mutex<Decimal>,

    trades_count: AtomicU64,
    cancels_count: AtomicU64,
    pause_log_count: AtomicU64,
    last_seen_trade_id: AtomicU64,

    journal: Mutex<Option<Arc<Journal>>>,
    alerts: Mutex<Option<Arc<AlertManager>>>,

    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MarketMaker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MarketMakerConfig,
        pricing: Arc<PricingEngine>,
        inventory: Arc<InventoryManager>,
        guardian: Arc<RiskGuardian>,
        order_rate_limiter: Arc<RateLimiter>,
        cancel_rate_limiter: Arc<RateLimiter>,
        exchange: Arc<dyn ExchangeClient>,
        clock: Arc<dyn Clock>,
        account: Arc<SharedAccountState>,
        risk_scaling: RiskScalingEngine,
    ) -> Arc<Self> {
        let symbol = config.symbol.clone();
        Arc::new(Self {
            config,
            pricing,
            inventory,
            guardian,
            order_rate_limiter,
            cancel_rate_limiter,
            exchange,
            clock,
            account,
            orderbook: Mutex::new(OrderBookManager::new(symbol)),
            risk_scaling: Mutex::new(risk_scaling),
            last_quoted_mid: Mutex::new(None),
            last_refresh_mid: Mutex::new(None),
            last_trade_signal: Mutex::new(TradeSignal::None),
            freq_mult: Mutex::new(Decimal::ONE),
            trades_count: AtomicU64::new(0),
            cancels_count: AtomicU64::new(0),
            pause_log_count: AtomicU64::new(0),
            last_seen_trade_id: AtomicU64::new(0),
            journal: Mutex::new(None),
            alerts: Mutex::new(None),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    /// Attaches a trade journal; every fill observed by `poll_fills` after
    /// this call is appended to `trades.csv`. Optional — a `MarketMaker`
    /// runs fine without one (e.g. in unit tests).
    pub fn set_journal(&self, journal: Arc<Journal>) {
        *self.journal.lock() = Some(journal);
    }

    /// Attaches an alert manager; soft-threshold notifications are
    /// evaluated once per `update_quotes` cycle. Optional.
    pub fn set_alerts(&self, alerts: Arc<AlertManager>) {
        *self.alerts.lock() = Some(alerts);
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn trades_count(&self) -> u64 {
        self.trades_count.load(Ordering::Relaxed)
    }

    pub fn cancels_count(&self) -> u64 {
        self.cancels_count.load(Ordering::Relaxed)
    }

    /// Spawns the refresh task. A no-op if already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let mm = Arc::clone(self);
        let handle = tokio::spawn(async move {
            mm.run_loop().await;
        });
        *self.task.lock() = Some(handle);
    }

    /// Cancels the refresh task, then awaits a best-effort `cancel_all`
    /// with the configured bounded timeout; on timeout, abandons and logs.
    pub async fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::Release);
        let handle = self.task.lock().take();
        match handle {
            Some(handle) => {
                let timeout = Duration::from_secs(self.config.cancel_all_timeout_secs);
                if tokio::time::timeout(timeout, handle).await.is_err() {
                    error!(symbol = %self.config.symbol, "stop timed out waiting for refresh task to exit; abandoning");
                }
            }
            None => {
                self.force_cancel_all().await;
            }
        }
    }

    /// Applies a full order-book replace and, if the mid has moved at
    /// least `price_change_trigger_bps`, refreshes quotes.
    pub async fn on_orderbook_update(self: &Arc<Self>, bids: Vec<crate::data::OrderBookLevel>, asks: Vec<crate::data::OrderBookLevel>, timestamp_ms: u64) {
        let should_refresh = {
            let mut ob = self.orderbook.lock();
            ob.apply_full(bids, asks, timestamp_ms);
            let new_mid = ob.snapshot().and_then(|s| s.mid());
            let last_mid = *self.last_quoted_mid.lock();
            match (new_mid, last_mid) {
                (Some(new_mid), Some(last)) if !last.is_zero() => {
                    crate::decimal::fraction_to_bps((new_mid - last).abs() / last) >= self.config.price_change_trigger_bps
                }
                (Some(_), None) => true,
                _ => false,
            }
        };
        if should_refresh {
            self.update_quotes().await;
        }
    }

    fn current_freq_mult(&self) -> Decimal {
        *self.freq_mult.lock()
    }

    async fn run_loop(self: Arc<Self>) {
        let mut last_forced_refresh_ms = self.clock.now_ms();

        while self.running.load(Ordering::Acquire) {
            let freq_mult = self.current_freq_mult();
            let sleep_ms = scale_interval_ms(self.config.refresh_interval_ms, freq_mult);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

            if !self.running.load(Ordering::Acquire) {
                break;
            }

            self.poll_fills().await;

            let now_ms = self.clock.now_ms();
            let threshold_ms = scale_interval_ms(self.config.time_refresh_threshold_secs.saturating_mul(1000), freq_mult);
            let mid_drifted = {
                let last_refresh_mid = *self.last_refresh_mid.lock();
                let current_mid = self.orderbook.lock().snapshot().and_then(|s| s.mid());
                match (current_mid, last_refresh_mid) {
                    (Some(cur), Some(last)) if !last.is_zero() => {
                        crate::decimal::fraction_to_bps((cur - last).abs() / last) >= self.config.forced_refresh_drift_bps
                    }
                    _ => false,
                }
            };

            if now_ms.saturating_sub(last_forced_refresh_ms) >= threshold_ms || mid_drifted {
                self.force_cancel_all().await;
                last_forced_refresh_ms = now_ms;
            }

            self.update_quotes().await;
        }

        self.force_cancel_all().await;
    }

    /// Polls `get_trades` for fills not yet seen, applies each to the
    /// shared position mirror (fill happens-before the next quote update),
    /// and triggers a refresh if any were found.
    async fn poll_fills(self: &Arc<Self>) {
        let last_seen = self.last_seen_trade_id.load(Ordering::Acquire);
        let trades = match self.exchange.get_trades(Some(&self.config.symbol), 100).await {
            Ok(trades) => {
                self.guardian.record_transport_success();
                trades
            }
            Err(e) => {
                self.note_transport_error(&e);
                warn!(symbol = %self.config.symbol, error = %e, "failed to poll trades");
                return;
            }
        };

        let mut new_trades: Vec<_> = trades.into_iter().filter(|t| t.trade_id > last_seen).collect();
        if new_trades.is_empty() {
            return;
        }
        new_trades.sort_by_key(|t| t.trade_id);

        let journal = self.journal.lock().clone();
        for trade in &new_trades {
            self.last_seen_trade_id.fetch_max(trade.trade_id, Ordering::AcqRel);
            let mark_price = self.orderbook.lock().snapshot().and_then(|s| s.mid()).unwrap_or(trade.price);
            let mut position = self.account.position(&self.config.symbol);
            let realized = position.apply_fill(trade.side, trade.price, trade.quantity, mark_price, trade.timestamp_ms);
            self.account.report_fill(position, realized, trade.notional(), trade.fee, trade.is_maker);
            self.trades_count.fetch_add(1, Ordering::Relaxed);
            if let Some(journal) = &journal {
                journal.record(trade.clone());
            }
        }

        self.update_quotes().await;
    }

    /// The full quote-refresh pipeline: toxicity check, risk scaling,
    /// pricing, inventory skew, sizing, pre-trade risk checks, then
    /// diff-and-replace against the resting orders.
    pub async fn update_quotes(self: &Arc<Self>) {
        // 1. kill-switch fast path.
        if self.guardian.kill_switch.is_active() {
            return;
        }

        // 2. snapshot / mid.
        let snapshot = self.orderbook.lock().snapshot().cloned();
        let Some(snapshot) = snapshot else { return };
        let Some(mid) = snapshot.mid() else { return };
        let now_ms = self.clock.now_ms();

        // 3. risk-scaling bar + multipliers.
        let best_bid = snapshot.best_bid().unwrap_or(mid);
        let best_ask = snapshot.best_ask().unwrap_or(mid);
        let bar = Bar {
            high: best_bid.max(best_ask).max(mid),
            low: best_bid.min(best_ask).min(mid),
            close: mid,
        };
        let multipliers = {
            let mut rs = self.risk_scaling.lock();
            rs.add_bar(bar);
            rs.observe_equity(self.account.equity(), now_ms);
            rs.compute_risk_multiplier(mid)
        };

        let equity = self.account.equity();
        let position = self.account.position(&self.config.symbol);
        let pnl_state = self.account.pnl_snapshot();

        // 4. vol / depth.
        let vol_bps = self.orderbook.lock().realized_volatility_bps(20);
        let depth_bid = snapshot.depth_within_bps(Side::Buy, self.config.depth_band_bps);
        let depth_ask = snapshot.depth_within_bps(Side::Sell, self.config.depth_band_bps);

        // 5. toxicity.
        let toxicity = self.guardian.evaluate_toxicity(vol_bps, depth_bid, depth_ask);
        let (mut degrade_size_mult, mut degraded) = (Decimal::ONE, false);
        match toxicity.action {
            ToxicityAction::Pause => {
                self.throttled_pause_cancel(&toxicity).await;
                return;
            }
            ToxicityAction::Degrade => {
                degrade_size_mult = Decimal::new(5, 1); // 0.5
                degraded = true;
            }
            ToxicityAction::Normal => {}
        }

        // 6. pricing engine.
        let Some(quote) = self.pricing.compute_quote(&snapshot, position.quantity, vol_bps, Some(depth_bid), Some(depth_ask), now_ms) else {
            return;
        };

        // 7. size.
        let risk_mult = multipliers.risk_mult;
        let mut size = if mid.is_zero() {
            Decimal::ZERO
        } else {
            self.config.base_notional_per_side * risk_mult / mid * degrade_size_mult
        };
        if !size.is_zero() {
            let notional = size * mid;
            let max_notional = equity * self.config.max_order_notional_pct;
            if notional < self.config.min_order_notional && !mid.is_zero() {
                size = self.config.min_order_notional / mid;
            } else if notional > max_notional && !mid.is_zero() {
                size = max_notional / mid;
            }
        }

        // 8. spread adjustment: widen/narrow symmetrically to spread_mult.
        let (mut bid_price, mut ask_price) = (quote.bid_price, quote.ask_price);
        if multipliers.spread_mult != Decimal::ONE {
            let center = (bid_price + ask_price) / Decimal::TWO;
            let target_half = (ask_price - bid_price) / Decimal::TWO * multipliers.spread_mult;
            bid_price = crate::decimal::round_down_to_tick(center - target_half, self.pricing.params.tick_size);
            ask_price = crate::decimal::round_up_to_tick(center + target_half, self.pricing.params.tick_size);
        }

        // 9. should_bid / should_ask.
        let mut should_bid = self.inventory.should_quote_bid(&position, equity);
        let mut should_ask = self.inventory.should_quote_ask(&position, equity);
        if multipliers.is_risk_off {
            if position.is_flat() {
                should_bid = false;
                should_ask = false;
            } else if position.is_long() {
                should_bid = false; // only the side that reduces |inventory|.
            } else {
                should_ask = false;
            }
        }
        if degraded {
            match toxicity.imbalance {
                Some(imbalance) if imbalance > Decimal::ZERO => should_bid = false, // bid side heavier
                Some(imbalance) if imbalance < Decimal::ZERO => should_ask = false, // ask side heavier
                _ => {}
            }
        }

        // 10. trade signal, logged only on change.
        let spread_bps = snapshot.spread_bps().unwrap_or(Decimal::ZERO);
        let imbalance = toxicity.imbalance.unwrap_or(Decimal::ZERO);
        let signal = compute_trade_signal(toxicity.action, spread_bps, &position, imbalance);
        {
            let mut last_signal = self.last_trade_signal.lock();
            if *last_signal != signal {
                info!(symbol = %self.config.symbol, ?signal, "trade signal changed");
                *last_signal = signal;
            }
        }

        // 11. reconcile.
        self.reconcile_orders(
            should_bid,
            should_ask,
            bid_price,
            ask_price,
            size,
            mid,
            &position,
            equity,
            &pnl_state,
            Some((best_bid, best_ask, mid)),
        )
        .await;

        *self.last_quoted_mid.lock() = Some(mid);
        *self.last_refresh_mid.lock() = Some(mid);
        *self.freq_mult.lock() = multipliers.freq_mult;

        self.evaluate_alerts(now_ms);
    }

    /// Builds a snapshot scoped to this symbol's own counters and routes it
    /// through the attached [`AlertManager`], if any. A no-op when no
    /// alert manager has been set.
    fn evaluate_alerts(&self, now_ms: u64) {
        let Some(alerts) = self.alerts.lock().clone() else { return };
        let mut open_orders_per_symbol = std::collections::HashMap::new();
        open_orders_per_symbol.insert(self.config.symbol.clone(), 0usize);
        let snapshot = crate::metrics::build_snapshot(
            &self.account,
            now_ms,
            24,
            rust_decimal::Decimal::from(252u32),
            Decimal::ZERO,
            open_orders_per_symbol,
            self.trades_count(),
            self.cancels_count(),
            self.guardian.kill_switch.is_active(),
            self.guardian.kill_switch.reason(),
        );
        alerts.evaluate(
            &self.config.symbol,
            &snapshot,
            self.guardian.limit_params.daily_loss_limit_pct,
            self.guardian.limit_params.max_drawdown_soft_pct,
            self.config.max_cancel_to_trade_ratio,
        );
    }

    /// Records a transport failure against the risk guardian's
    /// consecutive-failure counter; a no-op for any other error kind.
    fn note_transport_error(&self, e: &EngineError) {
        if let EngineError::Transport(_) = e {
            self.guardian.record_transport_failure(&e.to_string());
        }
    }

    /// Cancels an own order if unwanted or off-tolerance; submits a fresh
    /// one per side still wanted with no resting order within tolerance,
    /// gated by `check_all_limits`. Cancel-before-replace ordering is
    /// preserved by resolving every cancel before any submit.
    #[allow(clippy::too_many_arguments)]
    async fn reconcile_orders(
        &self,
        should_bid: bool,
        should_ask: bool,
        bid_price: Decimal,
        ask_price: Decimal,
        size: Decimal,
        mid: Decimal,
        position: &Position,
        equity: Decimal,
        pnl_state: &PnLState,
        ob_bests: Option<(Decimal, Decimal, Decimal)>,
    ) {
        let open_orders = match self.exchange.get_open_orders(Some(&self.config.symbol)).await {
            Ok(orders) => {
                self.guardian.record_transport_success();
                orders
            }
            Err(e) => {
                self.note_transport_error(&e);
                warn!(symbol = %self.config.symbol, error = %e, "failed to fetch open orders; skipping reconcile");
                return;
            }
        };

        let tolerance = crate::decimal::bps_to_fraction(self.config.reconcile_tolerance_bps) * mid;
        let (mut keep_bid, mut keep_ask) = (false, false);

        for order in open_orders.iter().filter(|o| o.is_open()) {
            let wanted = match order.side {
                Side::Buy => should_bid,
                Side::Sell => should_ask,
            };
            let target_price = match order.side {
                Side::Buy => bid_price,
                Side::Sell => ask_price,
            };
            let within_tolerance = (order.price - target_price).abs() <= tolerance;

            if !wanted || !within_tolerance {
                self.cancel_one(order).await;
            } else {
                match order.side {
                    Side::Buy => keep_bid = true,
                    Side::Sell => keep_ask = true,
                }
            }
        }

        if should_bid && !keep_bid {
            self.submit_if_approved(Side::Buy, bid_price, size, position, equity, pnl_state, ob_bests).await;
        }
        if should_ask && !keep_ask {
            self.submit_if_approved(Side::Sell, ask_price, size, position, equity, pnl_state, ob_bests).await;
        }
    }

    async fn cancel_one(&self, order: &Order) {
        if !self.cancel_rate_limiter.allow() {
            let wait = self.cancel_rate_limiter.time_until_available();
            tokio::time::sleep(wait).await;
            if !self.cancel_rate_limiter.allow() {
                warn!(symbol = %self.config.symbol, "cancel rate-limited; leaving stale order resting this cycle");
                return;
            }
        }
        let Some(order_id) = order.order_id else { return };
        match self.exchange.cancel_order(order_id, &self.config.symbol).await {
            Ok(_) => {
                self.guardian.record_transport_success();
                self.cancels_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.note_transport_error(&e);
                warn!(symbol = %self.config.symbol, order_id, error = %e, "cancel failed");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn submit_if_approved(
        &self,
        side: Side,
        price: Decimal,
        size: Decimal,
        position: &Position,
        equity: Decimal,
        pnl_state: &PnLState,
        ob_bests: Option<(Decimal, Decimal, Decimal)>,
    ) {
        if size.is_zero() || price <= Decimal::ZERO {
            return;
        }
        let candidate = Order::new(self.config.symbol.clone(), side, price, size, self.clock.now_ms());
        if let Err(e) = self.guardian.check_all_limits(Some(&candidate), position, equity, pnl_state, &self.inventory, ob_bests) {
            debug!(symbol = %self.config.symbol, %side, error = %e, "order rejected by risk guardian");
            return;
        }
        if !self.order_rate_limiter.allow() {
            let wait = self.order_rate_limiter.time_until_available();
            tokio::time::sleep(wait).await;
            if !self.order_rate_limiter.allow() {
                warn!(symbol = %self.config.symbol, %side, "new-order rate-limited; skipping this cycle");
                return;
            }
        }
        match self.exchange.submit_order(candidate).await {
            Ok(_) => self.guardian.record_transport_success(),
            Err(e) => {
                self.note_transport_error(&e);
                warn!(symbol = %self.config.symbol, %side, error = %e, "order submit failed");
            }
        }
    }

    async fn throttled_pause_cancel(&self, toxicity: &ToxicityResult) {
        let count = self.pause_log_count.fetch_add(1, Ordering::Relaxed);
        if count % 20 == 0 {
            warn!(symbol = %self.config.symbol, reason = ?toxicity.reason, "toxicity pause: cancelling all quotes");
        }
        self.force_cancel_all().await;
    }

    async fn force_cancel_all(&self) {
        match self.exchange.cancel_all_orders(Some(&self.config.symbol)).await {
            Ok(_) => self.guardian.record_transport_success(),
            Err(e) => {
                self.note_transport_error(&e);
                warn!(symbol = %self.config.symbol, error = %e, "cancel_all failed");
            }
        }
    }
}

impl Drop for MarketMaker {
    /// `stop()` is the only path that guarantees cancellation completes;
    /// Rust's `Drop` cannot `.await`, so a `MarketMaker` dropped without an
    /// explicit `stop()` only flags the refresh task to exit and logs —
    /// callers must call `stop().await` for the bounded best-effort
    /// `cancel_all` on shutdown.
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            warn!(symbol = %self.config.symbol, "MarketMaker dropped without stop(): open orders may remain resting");
        }
    }
}

fn scale_interval_ms(base_ms: u64, mult: Decimal) -> u64 {
    let scaled = Decimal::from(base_ms) * mult;
    scaled.to_u64().unwrap_or(base_ms).max(1)
}

fn compute_trade_signal(action: ToxicityAction, spread_bps: Decimal, position: &Position, imbalance: Decimal) -> TradeSignal {
    if action == ToxicityAction::Pause {
        return TradeSignal::None;
    }
    if spread_bps < Decimal::from(3u32) {
        return TradeSignal::None;
    }
    if position.is_flat() {
        if imbalance >= Decimal::new(75, 2) {
            TradeSignal::EnterLong
        } else if imbalance <= -Decimal::new(75, 2) {
            TradeSignal::EnterShort
        } else {
            TradeSignal::None
        }
    } else if position.is_long() {
        if imbalance.abs() < Decimal::new(40, 2) {
            TradeSignal::ExitLong
        } else {
            TradeSignal::None
        }
    } else if imbalance.abs() < Decimal::new(40, 2) {
        TradeSignal::ExitShort
    } else {
        TradeSignal::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trade_signal_none_when_spread_too_tight() {
        let position = Position::flat("BTC-PERP", 0);
        let signal = compute_trade_signal(ToxicityAction::Normal, dec!(2), &position, dec!(0.9));
        assert_eq!(signal, TradeSignal::None);
    }

    #[test]
    fn trade_signal_enters_long_on_strong_bid_imbalance() {
        let position = Position::flat("BTC-PERP", 0);
        let signal = compute_trade_signal(ToxicityAction::Normal, dec!(10), &position, dec!(0.8));
        assert_eq!(signal, TradeSignal::EnterLong);
    }

    #[test]
    fn trade_signal_exits_long_when_imbalance_flattens() {
        let mut position = Position::flat("BTC-PERP", 0);
        position.quantity = dec!(1);
        let signal = compute_trade_signal(ToxicityAction::Normal, dec!(10), &position, dec!(0.1));
        assert_eq!(signal, TradeSignal::ExitLong);
    }

    #[test]
    fn trade_signal_none_while_paused() {
        let position = Position::flat("BTC-PERP", 0);
        let signal = compute_trade_signal(ToxicityAction::Pause, dec!(10), &position, dec!(0.9));
        assert_eq!(signal, TradeSignal::None);
    }

    #[test]
    fn shared_account_state_aggregates_equity_across_symbols() {
        let account = SharedAccountState::new(dec!(1000), 0);
        let mut btc = Position::flat("BTC-PERP", 0);
        btc.apply_fill(Side::Buy, dec!(100), dec!(1), dec!(110), 1);
        account.report_fill(btc, Decimal::ZERO, dec!(100), Decimal::ZERO, true);

        let mut eth = Position::flat("ETH-PERP", 0);
        eth.apply_fill(Side::Sell, dec!(50), dec!(2), dec!(45), 2);
        account.report_fill(eth, Decimal::ZERO, dec!(100), Decimal::ZERO, true);

        // BTC unrealized: (110-100)*1 = 10. ETH unrealized: (45-50)*-2 = 10.
        assert_eq!(account.equity(), dec!(1020));
    }

    #[test]
    fn scale_interval_ms_scales_by_multiplier() {
        assert_eq!(scale_interval_ms(1000, dec!(2)), 2000);
        assert_eq!(scale_interval_ms(1000, dec!(0.5)), 500);
        assert_eq!(scale_interval_ms(0, dec!(2)), 1); // never zero-sleep
    }
}
