//! Risk limits: stateless predicates evaluated against a snapshot of
//! equity/position/order state. Each returns whether the limit is violated
//! and, if so, a human-readable reason. All thresholds are runtime
//! `Config`-driven percentages of equity rather than compiled-in constants.

use crate::data::{Order, PnLState, Position};
use rust_decimal::Decimal;

/// Result of a single limit check: whether it was violated, and why.
#[derive(Debug, Clone)]
pub struct LimitCheck {
    pub violated: bool,
    pub reason: Option<String>,
}

impl LimitCheck {
    pub fn ok() -> Self {
        Self { violated: false, reason: None }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self { violated: true, reason: Some(reason.into()) }
    }
}

/// Runtime-configured thresholds for the stateless predicates below.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimitParams {
    pub daily_loss_limit_pct: Decimal,
    pub max_drawdown_soft_pct: Decimal,
    pub max_drawdown_hard_pct: Decimal,
    pub max_net_notional_pct_per_symbol: Decimal,
    pub max_order_notional_pct: Decimal,
    pub max_price_distance_from_best_pct: Decimal,
}

/// `daily_realized_pnl <= -equity * daily_loss_limit_pct`.
pub fn check_daily_loss(pnl: &PnLState, params: &RiskLimitParams) -> LimitCheck {
    let threshold = -pnl.current_equity * params.daily_loss_limit_pct;
    if pnl.daily_realized_pnl <= threshold {
        LimitCheck::fail(format!(
            "daily realized pnl {} breaches daily loss limit {}",
            pnl.daily_realized_pnl, threshold
        ))
    } else {
        LimitCheck::ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawdownSeverity {
    None,
    Soft,
    Hard,
}

/// Soft at `drawdown >= equity*soft_pct`, hard at `>= equity*hard_pct`.
pub fn check_drawdown(pnl: &PnLState, params: &RiskLimitParams) -> (DrawdownSeverity, LimitCheck) {
    let equity = pnl.peak_equity;
    let hard_threshold = equity * params.max_drawdown_hard_pct;
    let soft_threshold = equity * params.max_drawdown_soft_pct;

    if pnl.drawdown >= hard_threshold {
        (
            DrawdownSeverity::Hard,
            LimitCheck::fail(format!("drawdown {} breaches hard limit {}", pnl.drawdown, hard_threshold)),
        )
    } else if pnl.drawdown >= soft_threshold {
        (
            DrawdownSeverity::Soft,
            LimitCheck::fail(format!("drawdown {} breaches soft limit {}", pnl.drawdown, soft_threshold)),
        )
    } else {
        (DrawdownSeverity::None, LimitCheck::ok())
    }
}

/// `|position.notional| <= max_net_notional` where
/// `max_net_notional = equity * max_net_notional_pct_per_symbol`.
pub fn check_position_notional(position: &Position, equity: Decimal, params: &RiskLimitParams) -> LimitCheck {
    let max_net_notional = equity * params.max_net_notional_pct_per_symbol;
    if position.notional() > max_net_notional {
        LimitCheck::fail(format!(
            "position notional {} exceeds max net notional {}",
            position.notional(),
            max_net_notional
        ))
    } else {
        LimitCheck::ok()
    }
}

/// `order.notional <= max_order_notional` where
/// `max_order_notional = equity * max_order_notional_pct`.
pub fn check_order_size(order: &Order, equity: Decimal, params: &RiskLimitParams) -> LimitCheck {
    let max_order_notional = equity * params.max_order_notional_pct;
    if order.notional() > max_order_notional {
        LimitCheck::fail(format!(
            "order notional {} exceeds max order notional {}",
            order.notional(),
            max_order_notional
        ))
    } else {
        LimitCheck::ok()
    }
}

/// Rejects if `price < best_bid - mid*max_price_distance_pct` or
/// `price > best_ask + mid*max_price_distance_pct`.
pub fn check_price_band(
    price: Decimal,
    best_bid: Decimal,
    best_ask: Decimal,
    mid: Decimal,
    params: &RiskLimitParams,
) -> LimitCheck {
    let band = mid * params.max_price_distance_from_best_pct;
    let lower = best_bid - band;
    let upper = best_ask + band;
    if price < lower || price > upper {
        LimitCheck::fail(format!("price {} outside band [{}, {}]", price, lower, upper))
    } else {
        LimitCheck::ok()
    }
}
