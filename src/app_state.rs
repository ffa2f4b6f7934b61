// =============================================================================
// Central Application State — Pulse alert engine
// =============================================================================
//
// Owns one `InstrumentRuntime` per configured symbol and the sending half of
// the alert channel.  The symbol map is built once in `new` and never
// mutated, so routing an event needs no global lock: each runtime sits behind
// its own `parking_lot::Mutex`, held only for the synchronous update.
//
// Thread safety:
//   - Atomic counters for lock-free statistics.
//   - parking_lot::Mutex per instrument; never held across an await.
//   - Bounded tokio mpsc for alerts; a full channel drops the alert.
//
// Heartbeats run on the exchange clock.  Each trade records the offset between
// its exchange timestamp and the local receive time, and `heartbeat_all`
// shifts the wall clock by the latest offset before touching any bucket.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::alert_gate::AlertState;
use crate::context::ContextSnapshot;
use crate::decision_envelope::AlertEvent;
use crate::instrument::{Evaluation, InstrumentRuntime};
use crate::market_data::FeedEvent;
use crate::runtime_config::RuntimeConfig;
use crate::types::{Side, Tick};

// =============================================================================
// Statistics
// =============================================================================

/// Lock-free event counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub quotes: AtomicU64,
    pub trades: AtomicU64,
    pub evaluations: AtomicU64,
    pub alerts_sent: AtomicU64,
    pub alerts_dropped: AtomicU64,
    pub malformed: AtomicU64,
    pub unknown_symbol: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub quotes: u64,
    pub trades: u64,
    pub evaluations: u64,
    pub alerts_sent: u64,
    pub alerts_dropped: u64,
    pub malformed: u64,
    pub unknown_symbol: u64,
}

impl EngineStats {
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            quotes: self.quotes.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_symbol: self.unknown_symbol.load(Ordering::Relaxed),
        }
    }
}

/// Marks `clock_offset` as unset until the first tracked trade.
const NO_OFFSET: i64 = i64::MIN;

// =============================================================================
// Status snapshot
// =============================================================================

/// Read-only view of one instrument for status logging.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentStatus {
    pub symbol: String,
    pub mid: Option<f64>,
    pub spread: f64,
    pub long_state: AlertState,
    pub short_state: AlertState,
    pub last_snapshot: Option<ContextSnapshot>,
}

// =============================================================================
// AppState
// =============================================================================

/// Shared engine state, wrapped in `Arc` and handed to every task.
pub struct AppState {
    ws_base_url: String,
    symbols: Vec<String>,
    instruments: HashMap<String, Arc<Mutex<InstrumentRuntime>>>,
    alert_tx: mpsc::Sender<AlertEvent>,
    /// Exchange time minus receive time of the latest trade, in seconds.
    clock_offset: AtomicI64,
    pub stats: EngineStats,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build one runtime per configured symbol.  Duplicate symbols collapse
    /// into one runtime.
    pub fn new(config: &RuntimeConfig, alert_tx: mpsc::Sender<AlertEvent>) -> Self {
        let mut symbols = Vec::with_capacity(config.symbols.len());
        let mut instruments = HashMap::with_capacity(config.symbols.len());
        for symbol in &config.symbols {
            if instruments.contains_key(symbol) {
                continue;
            }
            let cfg = Arc::new(config.instrument_for(symbol).clone());
            instruments.insert(
                symbol.clone(),
                Arc::new(Mutex::new(InstrumentRuntime::new(symbol.clone(), cfg))),
            );
            symbols.push(symbol.clone());
        }

        Self {
            ws_base_url: config.ws_base_url.clone(),
            symbols,
            instruments,
            alert_tx,
            clock_offset: AtomicI64::new(NO_OFFSET),
            stats: EngineStats::default(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn ws_base_url(&self) -> &str {
        &self.ws_base_url
    }

    pub fn instrument(&self, symbol: &str) -> Option<&Arc<Mutex<InstrumentRuntime>>> {
        self.instruments.get(symbol)
    }

    // ── Event routing ───────────────────────────────────────────────────

    /// Route one decoded feed event to its instrument.
    pub fn apply(&self, event: FeedEvent) {
        match event {
            FeedEvent::Quote { symbol, bid, ask } => self.on_quote(&symbol, bid, ask),
            FeedEvent::Trade(tick) => {
                self.on_trade(&tick);
            }
        }
    }

    pub fn on_quote(&self, symbol: &str, bid: f64, ask: f64) {
        let Some(rt) = self.lookup(symbol) else {
            return;
        };
        self.stats.quotes.fetch_add(1, Ordering::Relaxed);
        rt.lock().on_quote(bid, ask);
    }

    /// Fold a trade received now; returns the number of alerts published.
    pub fn on_trade(&self, tick: &Tick) -> usize {
        self.on_trade_at(tick, chrono::Utc::now().timestamp())
    }

    /// Fold a trade that arrived at local time `received_sec`.
    pub fn on_trade_at(&self, tick: &Tick, received_sec: i64) -> usize {
        let Some(rt) = self.lookup(&tick.symbol) else {
            return 0;
        };
        self.stats.trades.fetch_add(1, Ordering::Relaxed);
        self.clock_offset
            .store(tick.time_sec().saturating_sub(received_sec), Ordering::Relaxed);
        // The lock guard is dropped before publishing.
        let eval = rt.lock().on_trade(tick);
        eval.map_or(0, |e| self.publish(e))
    }

    /// Exchange time matching local time `wall_sec`, once a trade has been
    /// seen.
    pub fn exchange_time(&self, wall_sec: i64) -> Option<i64> {
        match self.clock_offset.load(Ordering::Relaxed) {
            NO_OFFSET => None,
            offset => Some(wall_sec.saturating_add(offset)),
        }
    }

    /// Heartbeat every instrument at local time `wall_sec`; returns alerts
    /// published.  Does nothing before the first trade.
    pub fn heartbeat_all(&self, wall_sec: i64) -> usize {
        let Some(now_sec) = self.exchange_time(wall_sec) else {
            return 0;
        };
        let mut published = 0;
        for symbol in &self.symbols {
            let Some(rt) = self.instruments.get(symbol) else {
                continue;
            };
            let eval = rt.lock().on_heartbeat(now_sec);
            if let Some(e) = eval {
                published += self.publish(e);
            }
        }
        published
    }

    fn lookup(&self, symbol: &str) -> Option<&Arc<Mutex<InstrumentRuntime>>> {
        let rt = self.instruments.get(symbol);
        if rt.is_none() {
            self.stats.unknown_symbol.fetch_add(1, Ordering::Relaxed);
            trace!(symbol, "event for untracked symbol ignored");
        }
        rt
    }

    fn publish(&self, eval: Evaluation) -> usize {
        self.stats.evaluations.fetch_add(1, Ordering::Relaxed);
        let mut sent = 0;
        for alert in eval.alerts {
            let id = alert.id.clone();
            match self.alert_tx.try_send(alert) {
                Ok(()) => {
                    self.stats.alerts_sent.fetch_add(1, Ordering::Relaxed);
                    debug!(id = %id, "alert queued");
                    sent += 1;
                }
                Err(TrySendError::Full(_)) => {
                    self.stats.alerts_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(id = %id, "alert channel full, dropping alert");
                }
                Err(TrySendError::Closed(_)) => {
                    self.stats.alerts_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(id = %id, "alert channel closed, dropping alert");
                }
            }
        }
        sent
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Status of every instrument at `now_sec`, in configuration order.
    pub fn build_snapshot(&self, now_sec: i64) -> Vec<InstrumentStatus> {
        self.symbols
            .iter()
            .filter_map(|symbol| {
                let rt = self.instruments.get(symbol)?;
                let rt = rt.lock();
                Some(InstrumentStatus {
                    symbol: symbol.clone(),
                    mid: rt.mid(),
                    spread: rt.spread(),
                    long_state: rt.alert_state(Side::Long, now_sec),
                    short_state: rt.alert_state(Side::Short, now_sec),
                    last_snapshot: rt.last_snapshot().cloned(),
                })
            })
            .collect()
    }
}
