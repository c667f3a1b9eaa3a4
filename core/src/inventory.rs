//! Inventory manager: tracks desired vs actual inventory and decides
//! whether each side may quote, and by how much the mid should skew.

use crate::data::Position;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy)]
pub struct InventoryParams {
    pub target_qty: Decimal,
    pub soft_band_pct: Decimal,
    pub hard_limit_pct: Decimal,
}

pub struct InventoryManager {
    pub params: InventoryParams,
}

impl InventoryManager {
    pub fn new(params: InventoryParams) -> Self {
        Self { params }
    }

    pub fn is_within_soft_band(&self, position: &Position, equity: Decimal) -> bool {
        position.notional().abs() <= equity * self.params.soft_band_pct
    }

    pub fn is_within_hard_limit(&self, position: &Position, equity: Decimal) -> bool {
        position.notional() <= equity * self.params.hard_limit_pct
    }

    pub fn skew_factor(&self, position: &Position, equity: Decimal) -> Decimal {
        let hard_limit = equity * self.params.hard_limit_pct;
        if hard_limit.is_zero() {
            return Decimal::ZERO;
        }
        (position.notional().abs() / hard_limit).min(Decimal::ONE).max(Decimal::ZERO)
    }

    pub fn should_quote_bid(&self, position: &Position, equity: Decimal) -> bool {
        if position.is_short() || position.is_flat() {
            true
        } else {
            self.is_within_hard_limit(position, equity)
        }
    }

    pub fn should_quote_ask(&self, position: &Position, equity: Decimal) -> bool {
        if position.is_long() || position.is_flat() {
            true
        } else {
            // Short beyond hard limit on the short side is symmetric: compare
            // abs notional against hard limit regardless of sign.
            position.notional().abs() <= equity * self.params.hard_limit_pct
        }
    }

    pub fn inventory_deviation(&self, position: &Position) -> Decimal {
        position.quantity - self.params.target_qty
    }
}
