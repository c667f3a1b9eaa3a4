//! The `marlin` binary: a single executable that runs the market-making
//! engine live, in paper/dry-run mode, or against a recorded backtest file,
//! plus the `status`/`stop`/`config-show`/`sweep` operator commands.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use marlin_bins::common::{init_logging, print_stats};
use marlin_core::alerts::AlertManager;
use marlin_core::backtest::BacktestFeed;
use marlin_core::clock::{Clock, SystemClock};
use marlin_core::config::{Config, TradingMode};
use marlin_core::exchange::{BookUpdate, ExchangeClient, MarketDataFeed};
use marlin_core::inventory::{InventoryManager, InventoryParams};
use marlin_core::journal::Journal;
use marlin_core::market_maker::{MarketMaker, MarketMakerConfig, SharedAccountState};
use marlin_core::metrics::build_snapshot;
use marlin_core::pricing::{PricingEngine, PricingParams};
use marlin_core::rate_limiter::{RateLimiter, RateLimiterConfig};
use marlin_core::risk_guardian::{RiskGuardian, ToxicityParams};
use marlin_core::risk_limits::RiskLimitParams;
use marlin_core::risk_scaling::{RiskScalingEngine, RiskScalingParams};
use marlin_core::simulated_exchange::SimulatedExchange;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "marlin", author, version, about = "Crypto perpetual-futures market-making engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    /// Directory runs/<UTC-timestamp>/ is created under.
    #[arg(long, global = true, default_value = "runs")]
    runs_root: PathBuf,

    /// Log level, overridden by RUST_LOG if set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the engine and runs until shutdown or feed exhaustion.
    Run {
        /// Directory holding `<SYMBOL>_orderbook.csv` files (backtest/paper modes).
        #[arg(long, default_value = "data/backtest")]
        data_dir: PathBuf,
    },
    /// Prints the most recent run's recorded state.
    Status,
    /// Signals a running `marlin run` process to shut down.
    Stop,
    /// Loads and prints the effective configuration.
    ConfigShow,
    /// Grid-searches strategy parameters against a backtest file.
    Sweep {
        #[arg(long, default_value = "data/backtest")]
        data_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::from(2);
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(dispatch(cli));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { data_dir } => cmd_run(&cli.config, &cli.runs_root, &data_dir).await,
        Command::Status => cmd_status(&cli.runs_root),
        Command::Stop => cmd_stop(&cli.runs_root),
        Command::ConfigShow => cmd_config_show(&cli.config),
        Command::Sweep { data_dir } => cmd_sweep(&cli.config, &data_dir).await,
    }
}

fn cmd_config_show(config_path: &std::path::Path) -> Result<()> {
    let cfg = Config::load(config_path).context("loading configuration")?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

fn latest_run_dir(runs_root: &std::path::Path) -> Result<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(runs_root)
        .with_context(|| format!("reading runs directory {runs_root:?}"))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs.pop().context("no runs found under runs_root")
}

fn cmd_status(runs_root: &std::path::Path) -> Result<()> {
    let run_dir = latest_run_dir(runs_root)?;
    let state_raw = std::fs::read_to_string(run_dir.join("state.json")).context("reading state.json")?;
    let trades_raw = std::fs::read_to_string(run_dir.join("trades.csv")).unwrap_or_default();
    let trade_count = trades_raw.lines().count().saturating_sub(1);

    println!("run: {}", run_dir.display());
    println!("state: {state_raw}");
    println!("recorded trades: {trade_count}");

    let pid_path = run_dir.join("marlin.pid");
    if let Ok(pid) = std::fs::read_to_string(&pid_path) {
        let pid = pid.trim();
        let alive = std::path::Path::new(&format!("/proc/{pid}")).exists();
        println!("pid {pid}: {}", if alive { "running" } else { "not running" });
    } else {
        println!("no pid file found; process likely exited cleanly");
    }
    Ok(())
}

fn cmd_stop(runs_root: &std::path::Path) -> Result<()> {
    let run_dir = latest_run_dir(runs_root)?;
    let pid_path = run_dir.join("marlin.pid");
    let pid_raw = std::fs::read_to_string(&pid_path).with_context(|| format!("no pid file at {pid_path:?}; is a run active?"))?;
    let pid = pid_raw.trim();

    let status = std::process::Command::new("kill").arg("-TERM").arg(pid).status().context("invoking kill")?;
    if !status.success() {
        bail!("failed to signal pid {pid} (process may have already exited)");
    }
    println!("sent SIGTERM to pid {pid}");
    Ok(())
}

struct Components {
    pricing: Arc<PricingEngine>,
    inventory: Arc<InventoryManager>,
    guardian: Arc<RiskGuardian>,
    order_rate_limiter: Arc<RateLimiter>,
    cancel_rate_limiter: Arc<RateLimiter>,
}

fn build_shared_components(cfg: &Config) -> Components {
    let pricing = Arc::new(PricingEngine::new(PricingParams {
        base_spread_bps: cfg.strategy.base_spread_bps,
        min_spread_bps: cfg.strategy.min_spread_bps,
        max_spread_bps: cfg.strategy.max_spread_bps,
        vol_spread_factor: cfg.strategy.vol_spread_factor,
        inventory_skew_strength: cfg.strategy.inventory_skew_strength,
        max_inventory_notional_pct: cfg.strategy.inventory_hard_limit_pct,
        tick_size: cfg.strategy.tick_size,
        shallow_widen_bps: cfg.strategy.min_spread_bps,
        shallow_depth_notional: cfg.risk.base_notional_per_side * Decimal::from(10u32),
    }));

    let inventory = Arc::new(InventoryManager::new(InventoryParams {
        target_qty: cfg.strategy.target_inventory,
        soft_band_pct: cfg.strategy.inventory_soft_band_pct,
        hard_limit_pct: cfg.strategy.inventory_hard_limit_pct,
    }));

    let guardian = Arc::new(RiskGuardian::new(
        RiskLimitParams {
            daily_loss_limit_pct: cfg.risk.daily_loss_limit_pct,
            max_drawdown_soft_pct: cfg.risk.max_drawdown_soft_pct,
            max_drawdown_hard_pct: cfg.risk.max_drawdown_hard_pct,
            max_net_notional_pct_per_symbol: cfg.risk.max_net_notional_pct_per_symbol,
            max_order_notional_pct: cfg.strategy.max_order_notional_pct,
            max_price_distance_from_best_pct: cfg.risk.max_price_distance_from_best_pct,
        },
        ToxicityParams {
            soft_imbalance: cfg.risk.toxicity.soft_imbalance,
            hard_imbalance: cfg.risk.toxicity.hard_imbalance,
            soft_vol_bps: cfg.risk.toxicity.soft_vol_bps,
            hard_vol_bps: cfg.risk.toxicity.hard_vol_bps,
        },
        cfg.risk.kill_switch_on_api_errors,
    ));

    let order_rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(cfg.risk.max_new_orders_per_second, cfg.risk.max_new_orders_per_second)));
    let cancel_rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(cfg.risk.max_cancels_per_second, cfg.risk.max_cancels_per_second)));

    Components { pricing, inventory, guardian, order_rate_limiter, cancel_rate_limiter }
}

fn risk_scaling_engine(cfg: &Config) -> RiskScalingEngine {
    RiskScalingEngine::new(RiskScalingParams {
        atr_length: cfg.risk.risk_scaling.atr_length,
        dd_lookback_hours: cfg.risk.risk_scaling.dd_lookback_hours,
        vol_low: cfg.risk.risk_scaling.vol_low,
        vol_high: cfg.risk.risk_scaling.vol_high,
        dd_soft: cfg.risk.risk_scaling.dd_soft,
        dd_hard: cfg.risk.risk_scaling.dd_hard,
        risk_min: cfg.risk.risk_scaling.risk_min,
        risk_max: cfg.risk.risk_scaling.risk_max,
        risk_off_threshold: cfg.risk.risk_off_threshold,
    })
}

fn market_maker_config(cfg: &Config, symbol: &str) -> MarketMakerConfig {
    MarketMakerConfig {
        symbol: symbol.to_string(),
        refresh_interval_ms: cfg.strategy.refresh_interval_ms,
        time_refresh_threshold_secs: cfg.strategy.max_quote_age_ms / 1000,
        price_change_trigger_bps: cfg.strategy.price_change_trigger_bps,
        forced_refresh_drift_bps: cfg.strategy.price_change_trigger_bps * Decimal::from(10u32),
        reconcile_tolerance_bps: cfg.strategy.price_change_trigger_bps,
        depth_band_bps: cfg.strategy.max_spread_bps * Decimal::from(4u32),
        base_notional_per_side: cfg.risk.base_notional_per_side,
        min_order_notional: cfg.strategy.min_order_notional,
        max_order_notional_pct: cfg.strategy.max_order_notional_pct,
        cancel_all_timeout_secs: 10,
        max_cancel_to_trade_ratio: cfg.risk.max_cancel_to_trade_ratio,
    }
}

/// Live trading requires an operator-supplied [`ExchangeClient`] /
/// [`MarketDataFeed`] pair for the target venue; this crate does not embed
/// one. Every other trading mode replays recorded top-of-book snapshots
/// against the simulated matcher, differing only in bookkeeping.
async fn cmd_run(config_path: &std::path::Path, runs_root: &std::path::Path, data_dir: &std::path::Path) -> Result<()> {
    let cfg = Config::load(config_path).context("loading configuration")?;

    if cfg.general.trading_mode == TradingMode::Live {
        bail!(
            "trading_mode = live requires an operator-supplied exchange client and market-data feed; \
             this binary only wires the simulated matcher (paper_exchange, dry_run, backtest modes)"
        );
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let started_at = chrono_like_timestamp(clock.now_ms());
    let journal = Arc::new(Journal::open(runs_root, started_at, cfg.general.bot_equity_usdt).context("opening journal")?);
    let alerts = Arc::new(AlertManager::with_log_sink(60));

    std::fs::write(journal.run_dir().join("marlin.pid"), std::process::id().to_string())?;

    let exchange: Arc<SimulatedExchange> = Arc::new(SimulatedExchange::new(cfg.general.bot_equity_usdt));
    let components = build_shared_components(&cfg);
    let account = SharedAccountState::new(cfg.general.bot_equity_usdt, clock.now_ms());

    let mut market_makers: HashMap<String, Arc<MarketMaker>> = HashMap::new();
    for symbol in &cfg.general.symbols {
        let mm = MarketMaker::new(
            market_maker_config(&cfg, symbol),
            components.pricing.clone(),
            components.inventory.clone(),
            components.guardian.clone(),
            components.order_rate_limiter.clone(),
            components.cancel_rate_limiter.clone(),
            exchange.clone() as Arc<dyn ExchangeClient>,
            clock.clone(),
            account.clone(),
            risk_scaling_engine(&cfg),
        );
        mm.set_journal(journal.clone());
        mm.set_alerts(alerts.clone());
        mm.start();
        market_makers.insert(symbol.clone(), mm);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("received shutdown signal");
        shutdown_ctrlc.store(true, Ordering::Release);
    })
    .context("installing ctrl-c handler")?;

    let mut feed = BacktestFeed::new(data_dir);
    feed.subscribe(&cfg.general.symbols).await.context("subscribing to market data")?;

    while !shutdown.load(Ordering::Acquire) {
        let event = match feed.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::info!("market-data feed exhausted, shutting down");
                break;
            }
            Err(e) => {
                tracing::warn!("market-data feed error: {e}");
                break;
            }
        };

        let Some(mm) = market_makers.get(&event.symbol) else { continue };
        match event.update {
            BookUpdate::Full { bids, asks } => {
                exchange.on_orderbook_update(&event.symbol, snapshot_from(&event.symbol, &bids, &asks, event.timestamp_ms), event.timestamp_ms);
                mm.on_orderbook_update(bids, asks, event.timestamp_ms).await;
            }
            BookUpdate::Diff { .. } => {
                tracing::warn!("incremental diffs are not supported by the recorded-snapshot feed; skipping");
            }
        }
    }

    for mm in market_makers.values() {
        mm.stop().await;
    }

    let trades = exchange.trades_for(None, usize::MAX);
    let positions: HashMap<String, marlin_core::data::Position> =
        cfg.general.symbols.iter().map(|symbol| (symbol.clone(), account.position(symbol))).collect();
    journal.write_summary(&trades, &positions).context("writing session summary")?;

    let snapshot = build_snapshot(
        &account,
        clock.now_ms(),
        24,
        Decimal::from(252u32),
        Decimal::ZERO,
        HashMap::new(),
        market_makers.values().map(|mm| mm.trades_count()).sum(),
        market_makers.values().map(|mm| mm.cancels_count()).sum(),
        components.guardian.kill_switch.is_active(),
        components.guardian.kill_switch.reason(),
    );
    print_stats(&snapshot);

    let _ = std::fs::remove_file(journal.run_dir().join("marlin.pid"));
    Ok(())
}

fn snapshot_from(symbol: &str, bids: &[marlin_core::data::OrderBookLevel], asks: &[marlin_core::data::OrderBookLevel], timestamp_ms: u64) -> marlin_core::orderbook::OrderBookSnapshot {
    marlin_core::orderbook::OrderBookSnapshot { symbol: symbol.to_string(), bids: bids.to_vec(), asks: asks.to_vec(), timestamp_ms }
}

/// Minimal RFC3339-ish timestamp without pulling in a datetime crate: the
/// journal only needs a monotonically distinct, filesystem-safe label.
fn chrono_like_timestamp(now_ms: u64) -> String {
    let secs = now_ms / 1000;
    format!("run-{secs}")
}

/// Grid-searches `base_spread_bps` x `inventory_skew_strength` against a
/// recorded backtest file and reports net PnL per combination, ranked best
/// first.
async fn cmd_sweep(config_path: &std::path::Path, data_dir: &std::path::Path) -> Result<()> {
    let base_cfg = Config::load(config_path).context("loading configuration")?;

    let spread_grid = [base_cfg.strategy.base_spread_bps, base_cfg.strategy.base_spread_bps * Decimal::from(2u32), base_cfg.strategy.base_spread_bps * Decimal::new(15, 1)];
    let skew_grid = [base_cfg.strategy.inventory_skew_strength, base_cfg.strategy.inventory_skew_strength * Decimal::new(15, 1)];

    let mut results: Vec<(Decimal, Decimal, Decimal)> = Vec::new();
    for &spread in &spread_grid {
        for &skew in &skew_grid {
            let mut cfg = base_cfg.clone();
            cfg.strategy.base_spread_bps = spread;
            cfg.strategy.inventory_skew_strength = skew;
            let final_equity = run_backtest_once(&cfg, data_dir).await?;
            results.push((spread, skew, final_equity - cfg.general.bot_equity_usdt));
        }
    }

    results.sort_by(|a, b| b.2.cmp(&a.2));
    println!("base_spread_bps,inventory_skew_strength,net_pnl");
    for (spread, skew, pnl) in &results {
        println!("{spread},{skew},{pnl}");
    }
    if let Some((spread, skew, pnl)) = results.first() {
        tracing::info!("best combo: base_spread_bps={spread} inventory_skew_strength={skew} net_pnl={pnl}");
    }
    Ok(())
}

async fn run_backtest_once(cfg: &Config, data_dir: &std::path::Path) -> Result<Decimal> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let exchange: Arc<SimulatedExchange> = Arc::new(SimulatedExchange::new(cfg.general.bot_equity_usdt));
    let components = build_shared_components(cfg);
    let account = SharedAccountState::new(cfg.general.bot_equity_usdt, 0);

    let mut market_makers: HashMap<String, Arc<MarketMaker>> = HashMap::new();
    for symbol in &cfg.general.symbols {
        let mm = MarketMaker::new(
            market_maker_config(cfg, symbol),
            components.pricing.clone(),
            components.inventory.clone(),
            components.guardian.clone(),
            components.order_rate_limiter.clone(),
            components.cancel_rate_limiter.clone(),
            exchange.clone() as Arc<dyn ExchangeClient>,
            clock.clone(),
            account.clone(),
            risk_scaling_engine(cfg),
        );
        market_makers.insert(symbol.clone(), mm);
    }

    let mut feed = BacktestFeed::new(data_dir);
    feed.subscribe(&cfg.general.symbols).await.context("subscribing to backtest data")?;

    while let Some(event) = feed.next_event().await.context("reading backtest event")? {
        let Some(mm) = market_makers.get(&event.symbol) else { continue };
        if let BookUpdate::Full { bids, asks } = event.update {
            exchange.on_orderbook_update(&event.symbol, snapshot_from(&event.symbol, &bids, &asks, event.timestamp_ms), event.timestamp_ms);
            mm.on_orderbook_update(bids, asks, event.timestamp_ms).await;
            mm.update_quotes().await;
        }
    }

    Ok(account.equity())
}
