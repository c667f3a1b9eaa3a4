//! External interfaces the core consumes: the exchange-client contract and
//! the market-data feed. A simulated implementation
//! ([`crate::simulated_exchange::SimulatedExchange`]) and a live
//! implementation must be interchangeable behind these traits. I/O-bound
//! exchange calls are modeled async since they cross a network boundary in
//! the live case.

use crate::data::{Order, Position, Trade};
use crate::errors::EngineResult;
use crate::orderbook::OrderBookSnapshot;
use async_trait::async_trait;

/// Consumed by the market-maker loop for order lifecycle and account
/// queries. Errors are signaled via `EngineResult`, never silent drops.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_orderbook(&self, symbol: &str, limit: usize) -> EngineResult<OrderBookSnapshot>;
    async fn submit_order(&self, order: Order) -> EngineResult<Order>;
    async fn cancel_order(&self, order_id: u64, symbol: &str) -> EngineResult<bool>;
    async fn cancel_all_orders(&self, symbol: Option<&str>) -> EngineResult<usize>;
    async fn get_open_orders(&self, symbol: Option<&str>) -> EngineResult<Vec<Order>>;
    async fn get_positions(&self, symbol: Option<&str>) -> EngineResult<Vec<Position>>;
    async fn get_trades(&self, symbol: Option<&str>, limit: usize) -> EngineResult<Vec<Trade>>;
    /// Idempotent.
    async fn close(&self) -> EngineResult<()>;
}

/// One order-book update as pushed by a market-data feed: either a full
/// replace or an incremental diff (price, qty) list per side.
#[derive(Debug, Clone)]
pub enum BookUpdate {
    Full { bids: Vec<crate::data::OrderBookLevel>, asks: Vec<crate::data::OrderBookLevel> },
    Diff { bids: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>, asks: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)> },
}

#[derive(Debug, Clone)]
pub struct MarketDataEvent {
    pub symbol: String,
    pub update: BookUpdate,
    pub timestamp_ms: u64,
}

/// Consumed by the market-maker loop; pushes book updates. Multi-stream
/// subscription routes by symbol; a single-stream feed (one symbol) is
/// accepted as the legacy shape via [`MarketDataFeed::subscribe_one`].
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Subscribes to updates for `symbols`, routed by symbol.
    async fn subscribe(&mut self, symbols: &[String]) -> EngineResult<()>;

    /// Pulls the next event, or `None` when the feed has been exhausted
    /// (e.g. a backtest file reaching EOF).
    async fn next_event(&mut self) -> EngineResult<Option<MarketDataEvent>>;

    /// Legacy single-stream shape: subscribes to exactly one symbol.
    async fn subscribe_one(&mut self, symbol: &str) -> EngineResult<()> {
        self.subscribe(&[symbol.to_string()]).await
    }
}
