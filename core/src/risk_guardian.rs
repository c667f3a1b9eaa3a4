//! Risk guardian: owns the kill-switch latch, orchestrates the pre-trade
//! limit checks, and evaluates order-book toxicity.

use crate::data::{Order, PnLState, Position};
use crate::errors::{EngineError, EngineResult};
use crate::inventory::InventoryManager;
use crate::risk_limits::{self, DrawdownSeverity, RiskLimitParams};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Latched kill-switch: once triggered, stays triggered until an explicit
/// manual reset. No internal code path may clear it.
#[derive(Clone)]
pub struct KillSwitch {
    active: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Triggers the kill-switch. A no-op if already active (the original
    /// reason is preserved).
    pub fn trigger(&self, reason: impl Into<String>) {
        if !self.active.swap(true, Ordering::AcqRel) {
            *self.reason.lock() = Some(reason.into());
            tracing::error!("kill-switch triggered: {}", self.reason().unwrap_or_default());
        }
    }

    /// Explicit operator-initiated reset. Never called internally.
    pub fn reset(&self) {
        self.active.store(false, Ordering::Release);
        *self.reason.lock() = None;
        tracing::warn!("kill-switch manually reset by operator");
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToxicityAction {
    Normal,
    Degrade,
    Pause,
}

#[derive(Debug, Clone, Copy)]
pub struct ToxicityParams {
    pub soft_imbalance: Decimal,
    pub hard_imbalance: Decimal,
    pub soft_vol_bps: Decimal,
    pub hard_vol_bps: Decimal,
}

impl Default for ToxicityParams {
    fn default() -> Self {
        Self {
            soft_imbalance: Decimal::new(70, 2),
            hard_imbalance: Decimal::new(90, 2),
            soft_vol_bps: Decimal::from(80u32),
            hard_vol_bps: Decimal::from(200u32),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToxicityResult {
    pub action: ToxicityAction,
    pub reason: Option<String>,
    pub imbalance: Option<Decimal>,
}

/// Orchestrates kill-switch state, limit checks and toxicity evaluation.
pub struct RiskGuardian {
    pub kill_switch: KillSwitch,
    pub limit_params: RiskLimitParams,
    pub toxicity_params: ToxicityParams,
    kill_switch_on_api_errors: u32,
    consecutive_transport_failures: AtomicU32,
}

impl RiskGuardian {
    pub fn new(limit_params: RiskLimitParams, toxicity_params: ToxicityParams, kill_switch_on_api_errors: u32) -> Self {
        Self {
            kill_switch: KillSwitch::new(),
            limit_params,
            toxicity_params,
            kill_switch_on_api_errors,
            consecutive_transport_failures: AtomicU32::new(0),
        }
    }

    /// Records a transport failure at an exchange I/O call site. Once
    /// `kill_switch_on_api_errors` consecutive failures accumulate, latches
    /// the kill-switch. A no-op once the kill-switch is already active.
    pub fn record_transport_failure(&self, reason: &str) {
        let failures = self.consecutive_transport_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if self.kill_switch_on_api_errors > 0 && failures >= self.kill_switch_on_api_errors {
            self.kill_switch.trigger(format!(
                "{failures} consecutive transport errors (limit {}): {reason}",
                self.kill_switch_on_api_errors
            ));
        }
    }

    /// Resets the consecutive-failure counter after a successful exchange call.
    pub fn record_transport_success(&self) {
        self.consecutive_transport_failures.store(0, Ordering::Release);
    }

    /// Runs the ordered pre-trade checks: kill-switch, then each risk limit
    /// in turn.
    ///
    /// `order` is the candidate order (if this call is gating a submit);
    /// `ob_bests` is `(best_bid, best_ask, mid)` when a book is available.
    #[allow(clippy::too_many_arguments)]
    pub fn check_all_limits(
        &self,
        order: Option<&Order>,
        position: &Position,
        equity: Decimal,
        pnl_state: &PnLState,
        inventory: &InventoryManager,
        ob_bests: Option<(Decimal, Decimal, Decimal)>,
    ) -> EngineResult<()> {
        // 1. kill-switch already active.
        if self.kill_switch.is_active() {
            return Err(EngineError::RiskViolation(
                self.kill_switch.reason().unwrap_or_else(|| "kill-switch active".to_string()),
            ));
        }

        // 2. daily loss.
        let daily_loss = risk_limits::check_daily_loss(pnl_state, &self.limit_params);
        if daily_loss.violated {
            let reason = daily_loss.reason.unwrap_or_default();
            self.kill_switch.trigger(format!("daily loss limit: {reason}"));
            return Err(EngineError::RiskViolation(reason));
        }

        // 3. drawdown soft/hard.
        let (severity, dd_check) = risk_limits::check_drawdown(pnl_state, &self.limit_params);
        match severity {
            DrawdownSeverity::Hard => {
                let reason = dd_check.reason.unwrap_or_default();
                self.kill_switch.trigger(format!("drawdown hard limit: {reason}"));
                return Err(EngineError::RiskViolation(reason));
            }
            DrawdownSeverity::Soft => {
                return Err(EngineError::RiskViolation(dd_check.reason.unwrap_or_default()));
            }
            DrawdownSeverity::None => {}
        }

        // 4. inventory hard limit.
        if !inventory.is_within_hard_limit(position, equity) {
            let reason = format!(
                "inventory notional {} exceeds hard limit ({}% of equity {})",
                position.notional(),
                inventory.params.hard_limit_pct * crate::decimal::HUNDRED,
                equity
            );
            self.kill_switch.trigger(format!("inventory hard limit: {reason}"));
            return Err(EngineError::RiskViolation(reason));
        }

        // 5. position net notional per symbol (no kill-switch).
        let notional_check = risk_limits::check_position_notional(position, equity, &self.limit_params);
        if notional_check.violated {
            return Err(EngineError::RiskViolation(notional_check.reason.unwrap_or_default()));
        }

        // 6. order-level: size, price-band (no kill-switch).
        if let Some(order) = order {
            let size_check = risk_limits::check_order_size(order, equity, &self.limit_params);
            if size_check.violated {
                return Err(EngineError::RiskViolation(size_check.reason.unwrap_or_default()));
            }
            if let Some((best_bid, best_ask, mid)) = ob_bests {
                let band_check =
                    risk_limits::check_price_band(order.price, best_bid, best_ask, mid, &self.limit_params);
                if band_check.violated {
                    return Err(EngineError::RiskViolation(band_check.reason.unwrap_or_default()));
                }
            }
        }

        Ok(())
    }

    /// `(bid_depth - ask_depth) / (bid_depth + ask_depth)`, plus the
    /// pause/degrade/normal classification against the configured
    /// soft/hard imbalance and volatility thresholds.
    pub fn evaluate_toxicity(&self, vol_bps: Option<Decimal>, bid_depth: Decimal, ask_depth: Decimal) -> ToxicityResult {
        let total = bid_depth + ask_depth;
        let imbalance = if total.is_zero() {
            Decimal::ZERO
        } else {
            (bid_depth - ask_depth) / total
        };

        let p = &self.toxicity_params;
        let vol = vol_bps.unwrap_or(Decimal::ZERO);

        if imbalance.abs() >= p.hard_imbalance || vol >= p.hard_vol_bps {
            return ToxicityResult {
                action: ToxicityAction::Pause,
                reason: Some(format!("imbalance={imbalance} vol_bps={vol}")),
                imbalance: Some(imbalance),
            };
        }
        if imbalance.abs() >= p.soft_imbalance || vol >= p.soft_vol_bps {
            return ToxicityResult {
                action: ToxicityAction::Degrade,
                reason: Some(format!("imbalance={imbalance} vol_bps={vol}")),
                imbalance: Some(imbalance),
            };
        }
        ToxicityResult { action: ToxicityAction::Normal, reason: None, imbalance: Some(imbalance) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventoryParams;
    use rust_decimal_macros::dec;

    fn guardian() -> RiskGuardian {
        RiskGuardian::new(
            RiskLimitParams {
                daily_loss_limit_pct: dec!(0.01),
                max_drawdown_soft_pct: dec!(0.05),
                max_drawdown_hard_pct: dec!(0.10),
                max_net_notional_pct_per_symbol: dec!(0.50),
                max_order_notional_pct: dec!(0.05),
                max_price_distance_from_best_pct: dec!(0.01),
            },
            ToxicityParams::default(),
            5,
        )
    }

    #[test]
    fn transport_failures_trigger_kill_switch_after_threshold() {
        let guardian = guardian();
        for _ in 0..4 {
            guardian.record_transport_failure("timeout");
            assert!(!guardian.kill_switch.is_active());
        }
        guardian.record_transport_failure("timeout");
        assert!(guardian.kill_switch.is_active());
    }

    #[test]
    fn transport_success_resets_the_failure_counter() {
        let guardian = guardian();
        guardian.record_transport_failure("timeout");
        guardian.record_transport_failure("timeout");
        guardian.record_transport_success();
        for _ in 0..4 {
            guardian.record_transport_failure("timeout");
        }
        assert!(!guardian.kill_switch.is_active());
    }

    fn inventory() -> InventoryManager {
        InventoryManager::new(InventoryParams {
            target_qty: Decimal::ZERO,
            soft_band_pct: dec!(0.20),
            hard_limit_pct: dec!(0.30),
        })
    }

    #[test]
    fn kill_switch_latches_and_never_auto_resets() {
        let ks = KillSwitch::new();
        ks.trigger("test reason");
        assert!(ks.is_active());
        ks.trigger("second reason should be ignored");
        assert_eq!(ks.reason(), Some("test reason".to_string()));
        ks.reset();
        assert!(!ks.is_active());
    }

    #[test]
    fn s4_daily_loss_triggers_kill_switch_and_rejects_subsequent_orders() {
        let guardian = guardian();
        let mut pnl = PnLState::new(dec!(200), 0);
        pnl.daily_realized_pnl = dec!(-2.01);
        let position = Position::flat("BTC-PERP", 0);
        let inv = inventory();

        let order = Order::new("BTC-PERP", crate::data::Side::Buy, dec!(50000), dec!(0.001), 0);
        let result = guardian.check_all_limits(Some(&order), &position, dec!(200), &pnl, &inv, None);
        assert!(result.is_err());
        assert!(guardian.kill_switch.is_active());

        // Subsequent check rejects purely because the kill-switch is latched.
        let result2 = guardian.check_all_limits(None, &position, dec!(200), &pnl, &inv, None);
        assert!(result2.is_err());
        assert!(result2.unwrap_err().to_string().contains("daily loss"));
    }

    #[test]
    fn s5_toxicity_pause_and_degrade_thresholds() {
        let guardian = guardian();
        let degrade = guardian.evaluate_toxicity(None, dec!(100), dec!(10));
        assert_eq!(degrade.action, ToxicityAction::Degrade);

        let pause = guardian.evaluate_toxicity(None, dec!(100), dec!(1));
        assert_eq!(pause.action, ToxicityAction::Pause);
    }

    #[test]
    fn toxicity_normal_when_balanced() {
        let guardian = guardian();
        let normal = guardian.evaluate_toxicity(Some(dec!(5)), dec!(100), dec!(95));
        assert_eq!(normal.action, ToxicityAction::Normal);
    }
}
