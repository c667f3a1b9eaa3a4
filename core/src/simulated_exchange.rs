//! Simulated exchange: a deterministic local matcher used by the paper and
//! backtest execution modes. Single-level, full-quantity matching only —
//! a resting order fills when the stored last-snapshot shows the opposite
//! side marketable against it, not against partial depth.

use crate::data::{Order, OrderStatus, Position, Side, Trade};
use crate::errors::{EngineError, EngineResult};
use crate::orderbook::OrderBookSnapshot;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

const TRADE_LOG_CAPACITY: usize = 10_000;

pub struct SimulatedExchange {
    open_orders: DashMap<String, Vec<Order>>,
    positions: DashMap<String, Position>,
    trades: Mutex<VecDeque<Trade>>,
    last_orderbook: DashMap<String, OrderBookSnapshot>,
    initial_equity: Decimal,
    current_equity: Mutex<Decimal>,
    next_order_id: AtomicU64,
    next_trade_id: AtomicU64,
}

impl SimulatedExchange {
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            open_orders: DashMap::new(),
            positions: DashMap::new(),
            trades: Mutex::new(VecDeque::with_capacity(TRADE_LOG_CAPACITY)),
            last_orderbook: DashMap::new(),
            initial_equity,
            current_equity: Mutex::new(initial_equity),
            next_order_id: AtomicU64::new(1),
            next_trade_id: AtomicU64::new(1),
        }
    }

    pub fn equity(&self) -> Decimal {
        *self.current_equity.lock()
    }

    pub fn position_for(&self, symbol: &str) -> Position {
        self.positions
            .get(symbol)
            .map(|p| p.clone())
            .unwrap_or_else(|| Position::flat(symbol, 0))
    }

    /// Submits an order: assigns an id if absent, marks it NEW, appends it
    /// to the symbol's open-order list, then matches synchronously so
    /// marketable orders fill immediately.
    pub fn submit(&self, mut order: Order, now_ms: u64) -> Order {
        if order.order_id.is_none() {
            order.order_id = Some(self.next_order_id.fetch_add(1, Ordering::Relaxed));
        }
        order.status = OrderStatus::New;
        order.timestamp_ms = now_ms;

        let symbol = order.symbol.clone();
        self.open_orders.entry(symbol.clone()).or_default().push(order.clone());

        if let Some(snapshot) = self.last_orderbook.get(&symbol).map(|s| s.clone()) {
            self.run_match(&symbol, &snapshot, now_ms);
        }

        // Return the caller's view with the final post-match status.
        self.open_orders
            .get(&symbol)
            .and_then(|orders| orders.iter().find(|o| o.order_id == order.order_id).cloned())
            .unwrap_or(order)
    }

    pub fn cancel(&self, order_id: u64, symbol: &str) -> bool {
        if let Some(mut orders) = self.open_orders.get_mut(symbol) {
            if let Some(pos) = orders.iter().position(|o| o.order_id == Some(order_id) && o.is_open()) {
                orders[pos].status = OrderStatus::Canceled;
                orders.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn cancel_all(&self, symbol: Option<&str>) -> usize {
        let mut count = 0;
        match symbol {
            Some(sym) => {
                if let Some(mut orders) = self.open_orders.get_mut(sym) {
                    count = orders.len();
                    orders.clear();
                }
            }
            None => {
                for mut entry in self.open_orders.iter_mut() {
                    count += entry.value().len();
                    entry.value_mut().clear();
                }
            }
        }
        count
    }

    pub fn open_orders_for(&self, symbol: Option<&str>) -> Vec<Order> {
        match symbol {
            Some(sym) => self.open_orders.get(sym).map(|o| o.clone()).unwrap_or_default(),
            None => self.open_orders.iter().flat_map(|e| e.value().clone()).collect(),
        }
    }

    pub fn trades_for(&self, symbol: Option<&str>, limit: usize) -> Vec<Trade> {
        let trades = self.trades.lock();
        trades
            .iter()
            .rev()
            .filter(|t| symbol.map(|s| s == t.symbol).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Stores the latest snapshot for `symbol` and runs the matcher
    /// against it.
    pub fn on_orderbook_update(&self, symbol: &str, snapshot: OrderBookSnapshot, now_ms: u64) {
        self.last_orderbook.insert(symbol.to_string(), snapshot.clone());
        self.run_match(symbol, &snapshot, now_ms);
    }

    /// BUY fills iff `order.price >= best_ask` at `fill_price = best_ask`;
    /// SELL fills iff `order.price <= best_bid` at `fill_price = best_bid`.
    /// Fills are processed in insertion order.
    fn run_match(&self, symbol: &str, snapshot: &OrderBookSnapshot, now_ms: u64) {
        let (Some(best_bid), Some(best_ask)) = (snapshot.best_bid(), snapshot.best_ask()) else {
            return;
        };

        let mut to_fill: Vec<(usize, Decimal)> = Vec::new();
        if let Some(orders) = self.open_orders.get(symbol) {
            for (idx, order) in orders.iter().enumerate() {
                if !order.is_open() {
                    continue;
                }
                match order.side {
                    Side::Buy if order.price >= best_ask => to_fill.push((idx, best_ask)),
                    Side::Sell if order.price <= best_bid => to_fill.push((idx, best_bid)),
                    _ => {}
                }
            }
        }

        if to_fill.is_empty() {
            return;
        }

        let mut filled_orders = Vec::new();
        if let Some(mut orders) = self.open_orders.get_mut(symbol) {
            for &(idx, fill_price) in &to_fill {
                if let Some(order) = orders.get_mut(idx) {
                    order.status = OrderStatus::Filled;
                    order.filled_quantity = order.quantity;
                    order.filled_price = Some(fill_price);
                    order.update_time_ms = Some(now_ms);
                    filled_orders.push((order.clone(), fill_price));
                }
            }
            // Remove filled orders; no longer open.
            orders.retain(|o| o.is_open());
        }

        for (order, fill_price) in filled_orders {
            self.apply_fill(&order, fill_price, snapshot, now_ms);
        }
    }

    fn apply_fill(&self, order: &Order, fill_price: Decimal, snapshot: &OrderBookSnapshot, now_ms: u64) {
        let trade_id = self.next_trade_id.fetch_add(1, Ordering::Relaxed);
        let trade = Trade {
            trade_id,
            order_id: order.order_id.unwrap_or(0),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price: fill_price,
            fee: Decimal::ZERO, // simulator assumes zero maker fees
            is_maker: true,
            timestamp_ms: now_ms,
        };

        {
            let mut trades = self.trades.lock();
            if trades.len() == TRADE_LOG_CAPACITY {
                trades.pop_front();
            }
            trades.push_back(trade);
        }

        let mark_price = snapshot.mid().unwrap_or(fill_price);
        let mut position = self
            .positions
            .entry(order.symbol.clone())
            .or_insert_with(|| Position::flat(order.symbol.clone(), now_ms));
        position.apply_fill(order.side, fill_price, order.quantity, mark_price, now_ms);

        self.recompute_equity();
    }

    fn recompute_equity(&self) {
        let total: Decimal = self
            .positions
            .iter()
            .map(|p| p.realized_pnl + p.unrealized_pnl)
            .sum();
        *self.current_equity.lock() = self.initial_equity + total;
    }
}

#[async_trait]
impl crate::exchange::ExchangeClient for SimulatedExchange {
    async fn get_orderbook(&self, symbol: &str, _limit: usize) -> EngineResult<OrderBookSnapshot> {
        self.last_orderbook
            .get(symbol)
            .map(|s| s.clone())
            .ok_or_else(|| EngineError::StateInconsistency(format!("no orderbook for {symbol}")))
    }

    async fn submit_order(&self, order: Order) -> EngineResult<Order> {
        Ok(self.submit(order, crate::clock::SystemClock.now_ms()))
    }

    async fn cancel_order(&self, order_id: u64, symbol: &str) -> EngineResult<bool> {
        Ok(self.cancel(order_id, symbol))
    }

    async fn cancel_all_orders(&self, symbol: Option<&str>) -> EngineResult<usize> {
        Ok(self.cancel_all(symbol))
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> EngineResult<Vec<Order>> {
        Ok(self.open_orders_for(symbol))
    }

    async fn get_positions(&self, symbol: Option<&str>) -> EngineResult<Vec<Position>> {
        Ok(match symbol {
            Some(sym) => self.positions.get(sym).map(|p| vec![p.clone()]).unwrap_or_default(),
            None => self.positions.iter().map(|e| e.value().clone()).collect(),
        })
    }

    async fn get_trades(&self, symbol: Option<&str>, limit: usize) -> EngineResult<Vec<Trade>> {
        Ok(self.trades_for(symbol, limit))
    }

    async fn close(&self) -> EngineResult<()> {
        Ok(())
    }
}

use crate::clock::Clock;
