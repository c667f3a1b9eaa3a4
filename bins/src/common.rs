//! Shared initialization used by the `marlin` binary.

use anyhow::Result;
use marlin_core::metrics::SystemSnapshot;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes structured logging. `RUST_LOG` takes precedence over `level`
/// when set.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    Ok(())
}

/// Prints a human-readable rendering of a [`SystemSnapshot`], used by the
/// `status` command and at shutdown.
pub fn print_stats(snapshot: &SystemSnapshot) {
    tracing::info!("=== Account Snapshot ===");
    tracing::info!("equity: {}", snapshot.equity);
    tracing::info!("peak equity: {}", snapshot.peak_equity);
    tracing::info!("max drawdown: {} ({}%)", snapshot.max_drawdown_abs, snapshot.max_drawdown_pct * rust_decimal::Decimal::from(100u32));
    tracing::info!("total trades: {} ({} today)", snapshot.total_trades, snapshot.trades_today);
    tracing::info!("total cancels: {}", snapshot.total_cancels);
    if let Some(ratio) = snapshot.cancel_to_trade_ratio {
        tracing::info!("cancel/trade ratio: {}", ratio);
    }
    if let Some(sharpe) = snapshot.sharpe {
        tracing::info!("sharpe: {}", sharpe);
    }
    if snapshot.kill_switch_active {
        tracing::error!("kill-switch ACTIVE: {}", snapshot.kill_switch_reason.as_deref().unwrap_or("unknown reason"));
    }
    for (symbol, open_orders) in &snapshot.open_orders_per_symbol {
        tracing::info!("{}: {} open orders", symbol, open_orders);
    }
}
