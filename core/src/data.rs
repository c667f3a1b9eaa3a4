//! Core data model: symbols, order-book levels/snapshots, orders, trades,
//! positions, PnL state and quotes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Signed sign multiplier: +1 for BUY, -1 for SELL.
    pub fn sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

/// Immutable per-symbol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: Decimal,
    pub min_quantity: Decimal,
    pub min_notional: Decimal,
    pub max_leverage: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// A client-facing order. `order_id` is assigned by the exchange client
/// (or the simulator) once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Option<u64>,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub filled_price: Option<Decimal>,
    pub timestamp_ms: u64,
    pub update_time_ms: Option<u64>,
}

impl Order {
    pub fn new(symbol: impl Into<String>, side: Side, price: Decimal, quantity: Decimal, timestamp_ms: u64) -> Self {
        Self {
            order_id: None,
            client_order_id: None,
            symbol: symbol.into(),
            side,
            quantity,
            price,
            status: OrderStatus::New,
            filled_quantity: Decimal::ZERO,
            filled_price: None,
            timestamp_ms,
            update_time_ms: None,
        }
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: u64,
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub is_maker: bool,
    pub timestamp_ms: u64,
}

impl Trade {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Per-symbol position with cost-basis accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub cost: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub timestamp_ms: u64,
}

impl Position {
    pub fn flat(symbol: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            cost: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            timestamp_ms,
        }
    }

    /// `cost/quantity`; undefined (`None`) when flat.
    pub fn entry_price(&self) -> Option<Decimal> {
        if self.quantity.is_zero() {
            None
        } else {
            Some(self.cost / self.quantity)
        }
    }

    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.mark_price
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    /// Applies a fill using cost-basis accounting across four branches:
    /// opening/same-direction increase, partial close, full close, flip.
    /// Returns the realized PnL delta produced by this fill.
    pub fn apply_fill(&mut self, side: Side, fill_price: Decimal, fill_qty: Decimal, mark_price: Decimal, timestamp_ms: u64) -> Decimal {
        let signed_qty = side.sign() * fill_qty;
        let signed_cost = fill_price * signed_qty;

        let old_q = self.quantity;
        let old_cost = self.cost;
        let old_entry = if !old_q.is_zero() { Some(old_cost / old_q) } else { None };

        let new_q = old_q + signed_qty;
        let mut realized = Decimal::ZERO;
        let new_cost;

        let opening_or_same_direction = old_q.is_zero() || old_q.signum() == signed_qty.signum();

        if opening_or_same_direction {
            // Case 1: opening or same-direction increase.
            new_cost = old_cost + signed_cost;
        } else if new_q.signum() == old_q.signum() && !new_q.is_zero() {
            // Case 2: partial close, same remaining direction.
            let entry = old_entry.expect("old_q nonzero when not opening");
            let close_qty = old_q.abs().min(signed_qty.abs());
            realized = if old_q > Decimal::ZERO {
                (fill_price - entry) * close_qty
            } else {
                (entry - fill_price) * close_qty
            };
            new_cost = entry * new_q;
        } else if new_q.is_zero() {
            // Case 3: full close.
            let entry = old_entry.expect("old_q nonzero when not opening");
            let close_qty = old_q.abs();
            realized = if old_q > Decimal::ZERO {
                (fill_price - entry) * close_qty
            } else {
                (entry - fill_price) * close_qty
            };
            new_cost = Decimal::ZERO;
        } else {
            // Case 4: flip.
            let entry = old_entry.expect("old_q nonzero when not opening");
            let close_qty = old_q.abs();
            realized = if old_q > Decimal::ZERO {
                (fill_price - entry) * close_qty
            } else {
                (entry - fill_price) * close_qty
            };
            // Only the flipping remainder contributes to the new cost basis.
            new_cost = fill_price * new_q;
        }

        self.quantity = new_q;
        self.cost = new_cost;
        self.realized_pnl += realized;
        self.mark_price = mark_price;
        self.timestamp_ms = timestamp_ms;
        self.unrealized_pnl = match self.entry_price() {
            Some(entry) => (mark_price - entry) * self.quantity,
            None => Decimal::ZERO,
        };

        realized
    }

    pub fn mark(&mut self, mark_price: Decimal) {
        self.mark_price = mark_price;
        self.unrealized_pnl = match self.entry_price() {
            Some(entry) => (mark_price - entry) * self.quantity,
            None => Decimal::ZERO,
        };
    }
}

/// PnL decomposition and equity bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnLState {
    pub spread_pnl: Decimal,
    pub spread_pnl_net: Decimal,
    pub inventory_pnl: Decimal,
    pub maker_commission: Decimal,
    pub taker_commission: Decimal,
    pub slippage_cost: Decimal,
    pub funding_pnl: Decimal,
    pub net_pnl: Decimal,
    pub initial_equity: Decimal,
    pub current_equity: Decimal,
    pub peak_equity: Decimal,
    pub drawdown: Decimal,
    pub drawdown_pct: Decimal,
    pub daily_realized_pnl: Decimal,
    pub daily_trades: u64,
    pub daily_volume: Decimal,
    pub daily_reset_time_ms: u64,
}

impl PnLState {
    pub fn new(initial_equity: Decimal, now_ms: u64) -> Self {
        Self {
            spread_pnl: Decimal::ZERO,
            spread_pnl_net: Decimal::ZERO,
            inventory_pnl: Decimal::ZERO,
            maker_commission: Decimal::ZERO,
            taker_commission: Decimal::ZERO,
            slippage_cost: Decimal::ZERO,
            funding_pnl: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            initial_equity,
            current_equity: initial_equity,
            peak_equity: initial_equity,
            drawdown: Decimal::ZERO,
            drawdown_pct: Decimal::ZERO,
            daily_realized_pnl: Decimal::ZERO,
            daily_trades: 0,
            daily_volume: Decimal::ZERO,
            daily_reset_time_ms: now_ms,
        }
    }

    /// Maintains peak and drawdown monotonically as equity is observed.
    pub fn update_equity(&mut self, equity: Decimal) {
        self.current_equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.drawdown = self.peak_equity - equity;
        self.drawdown_pct = if self.peak_equity > Decimal::ZERO {
            self.drawdown / self.peak_equity
        } else {
            Decimal::ZERO
        };
    }

    pub fn reset_daily(&mut self, now_ms: u64) {
        self.daily_realized_pnl = Decimal::ZERO;
        self.daily_trades = 0;
        self.daily_volume = Decimal::ZERO;
        self.daily_reset_time_ms = now_ms;
    }

    pub fn record_trade(&mut self, realized_pnl: Decimal, notional: Decimal, fee: Decimal, is_maker: bool) {
        self.daily_realized_pnl += realized_pnl;
        self.daily_trades += 1;
        self.daily_volume += notional;
        if is_maker {
            self.maker_commission += fee;
        } else {
            self.taker_commission += fee;
        }
        self.net_pnl += realized_pnl - fee;
    }
}

/// Output of the pricing engine. Sizes are placeholders overridden by the
/// market-maker loop after risk scaling is applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid_price: Decimal,
    pub bid_size: Decimal,
    pub ask_price: Decimal,
    pub ask_size: Decimal,
    pub timestamp_ms: u64,
}

impl Quote {
    pub fn is_valid(&self) -> bool {
        self.bid_price < self.ask_price
    }
}
