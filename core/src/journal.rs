//! Trade journal: append-only CSV + session state/summary artifacts under
//! `runs/<UTC-timestamp>/`.
//!
//! A bounded `crossbeam::channel` feeds a background writer thread; `Drop`
//! disconnects the sender and joins the thread so no event is lost on
//! shutdown. Produces `trades.csv`, `state.json` and `summary.md`.

use crate::data::{Side, Trade};
use crossbeam::channel::{bounded, Sender};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::{error, warn};

const CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Serialize)]
struct SessionState {
    initial_equity: Decimal,
    started_at: String,
}

#[derive(Default, Clone)]
struct SymbolAggregate {
    buy_qty: Decimal,
    sell_qty: Decimal,
    buy_notional: Decimal,
    sell_notional: Decimal,
    trade_count: u64,
}

/// Background-threaded, non-blocking trade journal. `record()` never
/// blocks the caller: a full channel drops the event and logs an error —
/// dropping a log event is preferable to stalling the engine.
pub struct Journal {
    sender: Option<Sender<Trade>>,
    handle: Option<JoinHandle<()>>,
    run_dir: PathBuf,
}

impl Journal {
    /// Creates `runs/<UTC-timestamp>/` and writes `state.json` synchronously
    /// (small, one-shot, not worth threading), then spawns the background
    /// CSV writer for trades.
    pub fn open(runs_root: impl AsRef<Path>, started_at: impl Into<String>, initial_equity: Decimal) -> anyhow::Result<Self> {
        let started_at = started_at.into();
        let run_dir = runs_root.as_ref().join(sanitize_dirname(&started_at));
        fs::create_dir_all(&run_dir)?;

        let state = SessionState { initial_equity, started_at };
        let state_path = run_dir.join("state.json");
        fs::write(&state_path, serde_json::to_vec_pretty(&state)?)?;

        let trades_path = run_dir.join("trades.csv");
        let (sender, receiver) = bounded::<Trade>(CHANNEL_CAPACITY);
        let handle = std::thread::spawn(move || writer_loop(trades_path, receiver));

        Ok(Self { sender: Some(sender), handle: Some(handle), run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Enqueues a fill for append to `trades.csv`. Non-blocking.
    pub fn record(&self, trade: Trade) {
        if let Some(sender) = &self.sender {
            if sender.try_send(trade).is_err() {
                error!("journal channel full or disconnected, dropping trade event");
            }
        }
    }

    /// Writes `summary.md`: per-symbol buy/sell aggregates, open positions,
    /// and totals, computed from the trades recorded this session.
    pub fn write_summary(&self, trades: &[Trade], open_positions: &HashMap<String, crate::data::Position>) -> anyhow::Result<()> {
        let mut per_symbol: HashMap<String, SymbolAggregate> = HashMap::new();
        for t in trades {
            let agg = per_symbol.entry(t.symbol.clone()).or_default();
            agg.trade_count += 1;
            match t.side {
                Side::Buy => {
                    agg.buy_qty += t.quantity;
                    agg.buy_notional += t.price * t.quantity;
                }
                Side::Sell => {
                    agg.sell_qty += t.quantity;
                    agg.sell_notional += t.price * t.quantity;
                }
            }
        }

        let mut out = String::new();
        out.push_str("# Session Summary\n\n");
        out.push_str(&format!("Total trades: {}\n\n", trades.len()));
        out.push_str("| Symbol | Buy Qty | Sell Qty | Buy Notional | Sell Notional | Trades | Open Position |\n");
        out.push_str("|---|---|---|---|---|---|---|\n");

        let mut symbols: HashSet<String> = per_symbol.keys().cloned().collect();
        symbols.extend(open_positions.keys().cloned());
        let mut symbols: Vec<String> = symbols.into_iter().collect();
        symbols.sort();

        for symbol in symbols {
            let agg = per_symbol.get(&symbol).cloned().unwrap_or_default();
            let pos_desc = open_positions
                .get(&symbol)
                .map(|p| format!("{} @ {}", p.quantity, p.entry_price().map(|e| e.to_string()).unwrap_or_else(|| "-".into())))
                .unwrap_or_else(|| "flat".to_string());
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |\n",
                symbol, agg.buy_qty, agg.sell_qty, agg.buy_notional, agg.sell_notional, agg.trade_count, pos_desc
            ));
        }

        fs::write(self.run_dir.join("summary.md"), out)?;
        Ok(())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        // Dropping the sender first closes the channel so the writer
        // thread's recv loop terminates; then we can join it.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("journal writer thread panicked during shutdown");
            }
        }
    }
}

fn writer_loop(trades_path: PathBuf, receiver: crossbeam::channel::Receiver<Trade>) {
    let file = OpenOptions::new().create(true).append(true).open(&trades_path);
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            error!("journal: failed to open {:?}: {}", trades_path, e);
            return;
        }
    };

    let is_empty = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
    if is_empty {
        if let Err(e) = writeln!(file, "timestamp,trade_id,order_id,symbol,side,price,quantity,fee,is_maker") {
            error!("journal: failed to write header: {}", e);
        }
    }

    let mut seen_trade_ids: HashSet<u64> = HashSet::new();

    for trade in receiver.iter() {
        if !seen_trade_ids.insert(trade.trade_id) {
            continue; // dedup by trade_id
        }
        let line = format!(
            "{},{},{},{},{},{},{},{},{}\n",
            trade.timestamp_ms, trade.trade_id, trade.order_id, trade.symbol, trade.side, trade.price, trade.quantity, trade.fee, trade.is_maker
        );
        if let Err(e) = file.write_all(line.as_bytes()) {
            error!("journal: failed to append trade: {}", e);
        }
    }
}

fn sanitize_dirname(s: &str) -> String {
    s.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}
