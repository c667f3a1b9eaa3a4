//! Configuration value object. Loading from TOML files and `MARLIN_`-prefixed
//! environment variables is layered on top of the plain value type via the
//! `config` crate, since every component above consumes the same
//! already-validated `Config`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Live,
    PaperExchange,
    DryRun,
    Backtest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub environment: String,
    pub trading_mode: TradingMode,
    pub bot_equity_usdt: Decimal,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub base_spread_bps: Decimal,
    pub min_spread_bps: Decimal,
    pub max_spread_bps: Decimal,
    pub vol_spread_factor: Decimal,
    pub inventory_skew_strength: Decimal,
    pub order_notional_pct: Decimal,
    pub min_order_notional: Decimal,
    pub max_order_notional_pct: Decimal,
    #[serde(default)]
    pub dynamic_size_by_vol: bool,
    pub refresh_interval_ms: u64,
    pub max_quote_age_ms: u64,
    pub price_change_trigger_bps: Decimal,
    pub target_inventory: Decimal,
    pub inventory_soft_band_pct: Decimal,
    pub inventory_hard_limit_pct: Decimal,
    #[serde(default)]
    pub flatten_on_shutdown: bool,
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScalingConfig {
    pub atr_length: usize,
    pub dd_lookback_hours: u64,
    pub vol_low: Decimal,
    pub vol_high: Decimal,
    pub dd_soft: Decimal,
    pub dd_hard: Decimal,
    pub risk_min: Decimal,
    pub risk_max: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToxicityConfig {
    #[serde(default = "default_soft_imbalance")]
    pub soft_imbalance: Decimal,
    #[serde(default = "default_hard_imbalance")]
    pub hard_imbalance: Decimal,
    pub soft_vol_bps: Decimal,
    pub hard_vol_bps: Decimal,
}

fn default_soft_imbalance() -> Decimal {
    Decimal::new(70, 2)
}
fn default_hard_imbalance() -> Decimal {
    Decimal::new(90, 2)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_net_notional_pct_per_symbol: Decimal,
    pub max_gross_notional_pct_per_symbol: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub max_drawdown_soft_pct: Decimal,
    pub max_drawdown_hard_pct: Decimal,
    pub max_open_orders_per_symbol: u32,
    pub max_new_orders_per_second: u64,
    pub max_cancels_per_second: u64,
    pub max_cancel_to_trade_ratio: Decimal,
    pub max_price_distance_from_best_pct: Decimal,
    #[serde(default = "default_true")]
    pub enable_kill_switch: bool,
    #[serde(default = "default_kill_switch_on_api_errors")]
    pub kill_switch_on_api_errors: u32,
    pub risk_scaling: RiskScalingConfig,
    #[serde(default = "default_risk_off_threshold")]
    pub risk_off_threshold: Decimal,
    pub base_notional_per_side: Decimal,
    pub toxicity: ToxicityConfig,
}

fn default_true() -> bool {
    true
}
fn default_kill_switch_on_api_errors() -> u32 {
    5
}
fn default_risk_off_threshold() -> Decimal {
    Decimal::new(3, 1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
}

impl Config {
    /// Loads configuration by layering a TOML file under `MARLIN_`-prefixed
    /// environment variable overrides (double-underscore-separated nested
    /// keys): file first, then environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let loader = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("MARLIN").separator("__"))
            .build()
            .with_context(|| format!("failed to build configuration from {:?}", path.as_ref()))?;

        let cfg: Config = loader.try_deserialize().context("failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_default() -> Result<Self> {
        Self::load("config/default.toml")
    }

    /// Validates the loaded config. Failures here are fatal: the process
    /// must exit non-zero before any orders are placed.
    pub fn validate(&self) -> Result<()> {
        if self.general.symbols.is_empty() {
            bail!("general.symbols must not be empty");
        }
        if self.general.bot_equity_usdt <= Decimal::ZERO {
            bail!("general.bot_equity_usdt must be positive");
        }
        if self.strategy.min_spread_bps > self.strategy.max_spread_bps {
            bail!(
                "strategy.min_spread_bps ({}) must be <= max_spread_bps ({})",
                self.strategy.min_spread_bps,
                self.strategy.max_spread_bps
            );
        }
        if self.strategy.refresh_interval_ms == 0 {
            bail!("strategy.refresh_interval_ms must be positive");
        }
        if self.risk.max_drawdown_soft_pct > self.risk.max_drawdown_hard_pct {
            bail!(
                "risk.max_drawdown_soft_pct ({}) must be <= max_drawdown_hard_pct ({})",
                self.risk.max_drawdown_soft_pct,
                self.risk.max_drawdown_hard_pct
            );
        }
        if self.risk.risk_scaling.risk_min > self.risk.risk_scaling.risk_max {
            bail!("risk.risk_scaling.risk_min must be <= risk_max");
        }
        if self.risk.risk_scaling.atr_length == 0 {
            bail!("risk.risk_scaling.atr_length must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[general]
environment = "dev"
trading_mode = "paper_exchange"
bot_equity_usdt = "1000"
symbols = ["BTC-PERP"]

[strategy]
base_spread_bps = "8"
min_spread_bps = "4"
max_spread_bps = "30"
vol_spread_factor = "1"
inventory_skew_strength = "1.2"
order_notional_pct = "0.05"
min_order_notional = "10"
max_order_notional_pct = "0.05"
refresh_interval_ms = 250
max_quote_age_ms = 1000
price_change_trigger_bps = "5"
target_inventory = "0"
inventory_soft_band_pct = "0.20"
inventory_hard_limit_pct = "0.30"

[risk]
max_net_notional_pct_per_symbol = "0.50"
max_gross_notional_pct_per_symbol = "0.80"
daily_loss_limit_pct = "0.01"
max_drawdown_soft_pct = "0.05"
max_drawdown_hard_pct = "0.10"
max_open_orders_per_symbol = 4
max_new_orders_per_second = 5
max_cancels_per_second = 5
max_cancel_to_trade_ratio = "10"
max_price_distance_from_best_pct = "0.01"
base_notional_per_side = "50"

[risk.risk_scaling]
atr_length = 14
dd_lookback_hours = 24
vol_low = "0.1"
vol_high = "1.0"
dd_soft = "0.05"
dd_hard = "0.20"
risk_min = "0.1"
risk_max = "1.5"

[risk.toxicity]
soft_vol_bps = "80"
hard_vol_bps = "200"
"#
    }

    #[test]
    fn loads_and_validates_a_well_formed_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", sample_toml()).unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.general.symbols, vec!["BTC-PERP".to_string()]);
        assert_eq!(cfg.general.trading_mode, TradingMode::PaperExchange);
    }

    #[test]
    fn rejects_inverted_spread_bounds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let bad = sample_toml().replace(r#"min_spread_bps = "4""#, r#"min_spread_bps = "40""#);
        write!(file, "{}", bad).unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn environment_override_takes_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", sample_toml()).unwrap();
        std::env::set_var("MARLIN_GENERAL__BOT_EQUITY_USDT", "5000");
        let cfg = Config::load(file.path()).unwrap();
        std::env::remove_var("MARLIN_GENERAL__BOT_EQUITY_USDT");
        assert_eq!(cfg.general.bot_equity_usdt, Decimal::from(5000));
    }
}
