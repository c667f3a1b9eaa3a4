//! Alerts: post-trade evaluation of *soft* thresholds, distinct from the
//! hard risk-limit rejections in [`crate::risk_limits`]/[`crate::risk_guardian`].
//! Rules are evaluated against a point-in-time [`SystemSnapshot`] and
//! dispatched through a pluggable [`NotificationSink`].

use crate::metrics::SystemSnapshot;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub symbol: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp_ms: u64,
}

/// Where notifications go. Implementations must not block the
/// market-maker loop; the default [`LogSink`] logs via `tracing` and
/// returns immediately.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, n: &Notification) {
        match n.severity {
            Severity::Critical => error!(symbol = %n.symbol, "{}", n.message),
            Severity::Warning => warn!(symbol = %n.symbol, "{}", n.message),
            Severity::Info => info!(symbol = %n.symbol, "{}", n.message),
        }
    }
}

/// Rate-limits repeated notifications for the same `(symbol, rule)` key to
/// at most one per `rate_limit_secs`.
pub struct AlertManager {
    sink: Box<dyn NotificationSink>,
    rate_limit_secs: u64,
    last_sent_ms: Mutex<HashMap<String, u64>>,
}

impl AlertManager {
    pub fn new(sink: Box<dyn NotificationSink>, rate_limit_secs: u64) -> Self {
        Self { sink, rate_limit_secs, last_sent_ms: Mutex::new(HashMap::new()) }
    }

    pub fn with_log_sink(rate_limit_secs: u64) -> Self {
        Self::new(Box::new(LogSink), rate_limit_secs)
    }

    fn should_send(&self, key: &str, now_ms: u64, severity: Severity) -> bool {
        if severity == Severity::Critical {
            return true; // critical alerts always pass the debounce
        }
        let mut last_sent = self.last_sent_ms.lock().unwrap();
        let threshold_ms = self.rate_limit_secs.saturating_mul(1000);
        match last_sent.get(key) {
            Some(&prev) if now_ms.saturating_sub(prev) < threshold_ms => false,
            _ => {
                last_sent.insert(key.to_string(), now_ms);
                true
            }
        }
    }

    fn send(&self, key: &str, n: Notification) {
        if self.should_send(key, n.timestamp_ms, n.severity) {
            self.sink.notify(&n);
        }
    }

    /// Evaluates soft thresholds against a freshly built snapshot and
    /// routes any resulting notifications through the sink. Called once
    /// per symbol per refresh cycle from the market-maker loop; never
    /// panics, never blocks on I/O.
    pub fn evaluate(
        &self,
        symbol: &str,
        snapshot: &SystemSnapshot,
        daily_loss_limit_pct: Decimal,
        drawdown_soft_pct: Decimal,
        cancel_ratio_warn_threshold: Decimal,
    ) {
        let now_ms = snapshot.timestamp_ms;

        if snapshot.kill_switch_active {
            self.send(
                &format!("{symbol}:kill_switch"),
                Notification {
                    symbol: symbol.to_string(),
                    severity: Severity::Critical,
                    message: format!(
                        "kill-switch active: {}",
                        snapshot.kill_switch_reason.clone().unwrap_or_else(|| "unknown".to_string())
                    ),
                    timestamp_ms: now_ms,
                },
            );
        }

        if snapshot.pnl.peak_equity > Decimal::ZERO {
            let daily_loss_pct = -snapshot.pnl.daily_realized_pnl / snapshot.pnl.peak_equity;
            let warn_threshold = daily_loss_limit_pct * Decimal::new(80, 2); // 80% of the hard limit
            if daily_loss_pct >= warn_threshold {
                self.send(
                    &format!("{symbol}:daily_loss"),
                    Notification {
                        symbol: symbol.to_string(),
                        severity: Severity::Warning,
                        message: format!("daily loss at {:.2}% of equity, approaching {:.2}% limit", daily_loss_pct * Decimal::from(100), daily_loss_limit_pct * Decimal::from(100)),
                        timestamp_ms: now_ms,
                    },
                );
            }
        }

        let dd_warn_threshold = drawdown_soft_pct * Decimal::new(80, 2);
        if snapshot.max_drawdown_pct >= dd_warn_threshold && snapshot.max_drawdown_pct < drawdown_soft_pct {
            self.send(
                &format!("{symbol}:drawdown"),
                Notification {
                    symbol: symbol.to_string(),
                    severity: Severity::Warning,
                    message: format!("drawdown at {:.2}%, approaching soft limit {:.2}%", snapshot.max_drawdown_pct * Decimal::from(100), drawdown_soft_pct * Decimal::from(100)),
                    timestamp_ms: now_ms,
                },
            );
        }

        if let Some(ratio) = snapshot.cancel_to_trade_ratio {
            if ratio >= cancel_ratio_warn_threshold {
                self.send(
                    &format!("{symbol}:cancel_ratio"),
                    Notification {
                        symbol: symbol.to_string(),
                        severity: Severity::Warning,
                        message: format!("cancel-to-trade ratio elevated at {ratio:.1}"),
                        timestamp_ms: now_ms,
                    },
                );
            }
        }
    }
}
