// =============================================================================
// Instrument Runtime — per-symbol candles, indicators and alert state
// =============================================================================
//
// One runtime per tracked symbol.  It is fed quotes and trades in arrival
// order and is the only place where candles, indicators and cooldowns for
// that symbol live.  All work is synchronous and bounded; callers hold the
// runtime behind an exclusive lock.
//
// Per trade the timeframes are fed bias -> context -> trigger, so a trigger
// close that coincides with a higher-timeframe close sees the fresh values.
// Only trigger closes run the gate.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alert_gate::{self, AlertState};
use crate::context::ContextSnapshot;
use crate::decision_envelope::{AlertDecision, AlertEvent};
use crate::indicators::{IndicatorBank, TimeframeFeatures};
use crate::market_data::{Bucketer, Candle};
use crate::runtime_config::InstrumentConfig;
use crate::types::{Quote, Side, Tick, Timeframe, SPREAD_UNAVAILABLE};

/// Candle builder plus indicator bank for one timeframe.
#[derive(Debug, Clone)]
struct Series {
    bucketer: Bucketer,
    bank: IndicatorBank,
}

impl Series {
    fn new(width_sec: u64, cfg: &InstrumentConfig) -> Self {
        Self {
            bucketer: Bucketer::new(width_sec),
            bank: IndicatorBank::new(&cfg.indicators),
        }
    }

    fn push(&mut self, time_sec: i64, price: f64, volume: f64) -> Option<Candle> {
        let (closed, _) = self.bucketer.update(time_sec, price, volume);
        if let Some(candle) = &closed {
            self.bank.on_candle(candle);
        }
        closed
    }
}

/// Outcome of one trigger-candle close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub symbol: String,
    pub now_sec: i64,
    pub mid: f64,
    pub spread: f64,
    pub snapshot: ContextSnapshot,
    /// One decision per side, LONG first.
    pub decisions: Vec<AlertDecision>,
    pub alerts: Vec<AlertEvent>,
}

#[derive(Debug, Clone)]
pub struct InstrumentRuntime {
    symbol: String,
    config: Arc<InstrumentConfig>,
    quote: Option<Quote>,
    bias: Series,
    context: Series,
    trigger: Series,
    last_alert: [Option<i64>; 2],
    last_price: Option<f64>,
    last_snapshot: Option<ContextSnapshot>,
}

impl InstrumentRuntime {
    pub fn new(symbol: impl Into<String>, config: Arc<InstrumentConfig>) -> Self {
        let widths = &config.timeframes;
        Self {
            symbol: symbol.into(),
            bias: Series::new(widths.width_of(Timeframe::Bias), &config),
            context: Series::new(widths.width_of(Timeframe::Context), &config),
            trigger: Series::new(widths.width_of(Timeframe::Trigger), &config),
            quote: None,
            last_alert: [None; 2],
            last_price: None,
            last_snapshot: None,
            config,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    // ── Quote handling ──────────────────────────────────────────────────

    /// Replace the stored best bid/ask.  Unusable quotes are dropped and the
    /// previous quote is kept.
    pub fn on_quote(&mut self, bid: f64, ask: f64) -> bool {
        let quote = Quote { bid, ask };
        if !quote.is_valid() || bid > ask {
            warn!(symbol = %self.symbol, bid, ask, "dropping invalid quote");
            return false;
        }
        self.quote = Some(quote);
        true
    }

    pub fn quote(&self) -> Option<Quote> {
        self.quote
    }

    /// Mid of the stored quote, if any.
    pub fn mid(&self) -> Option<f64> {
        self.quote.and_then(|q| q.mid())
    }

    /// Relative spread of the stored quote; `SPREAD_UNAVAILABLE` without one.
    pub fn spread(&self) -> f64 {
        self.quote.map_or(SPREAD_UNAVAILABLE, |q| q.spread())
    }

    // ── Trade handling ──────────────────────────────────────────────────

    /// Fold one trade.  Returns the evaluation when the trade closed a
    /// trigger candle.
    pub fn on_trade(&mut self, tick: &Tick) -> Option<Evaluation> {
        if !tick.price.is_finite() || tick.price <= 0.0 {
            warn!(
                symbol = %self.symbol,
                price = tick.price,
                "dropping trade with invalid price"
            );
            return None;
        }
        if !tick.quantity.is_finite() || tick.quantity < 0.0 {
            warn!(
                symbol = %self.symbol,
                quantity = tick.quantity,
                "dropping trade with invalid quantity"
            );
            return None;
        }
        let price = self.mid().unwrap_or(tick.price);
        self.ingest(tick.time_sec(), price, tick.quantity)
    }

    /// Feed the current price with zero volume so quiet markets still close
    /// candles.  `time_sec` is on the exchange clock; the sample is placed
    /// `heartbeat_grace_sec` earlier so that trades delivered late still land
    /// in their own bucket.  No-op before the first trade.
    pub fn on_heartbeat(&mut self, time_sec: i64) -> Option<Evaluation> {
        let last = self.last_price?;
        let price = self.mid().unwrap_or(last);
        let grace = i64::try_from(self.config.heartbeat_grace_sec).unwrap_or(i64::MAX);
        self.ingest(time_sec.saturating_sub(grace), price, 0.0)
    }

    fn ingest(&mut self, time_sec: i64, price: f64, volume: f64) -> Option<Evaluation> {
        self.last_price = Some(price);

        for (tf, series) in [
            (Timeframe::Bias, &mut self.bias),
            (Timeframe::Context, &mut self.context),
        ] {
            if let Some(c) = series.push(time_sec, price, volume) {
                debug!(
                    symbol = %self.symbol,
                    timeframe = %tf,
                    start = c.start_sec,
                    close = c.close,
                    "candle closed"
                );
            }
        }
        let closed = self.trigger.push(time_sec, price, volume)?;
        debug!(
            symbol = %self.symbol,
            timeframe = %Timeframe::Trigger,
            start = closed.start_sec,
            close = closed.close,
            volume = closed.volume,
            "candle closed"
        );

        Some(self.evaluate(&closed, time_sec, price))
    }

    fn evaluate(&mut self, closed: &Candle, now_sec: i64, price: f64) -> Evaluation {
        let snapshot = ContextSnapshot::assemble(
            closed,
            &self.features(Timeframe::Trigger),
            &self.features(Timeframe::Context),
            &self.features(Timeframe::Bias),
        );
        let mid = self.mid().unwrap_or(price);
        let spread = self.spread();

        let mut decisions = Vec::with_capacity(2);
        let mut alerts = Vec::new();
        for side in Side::ALL {
            let decision = alert_gate::evaluate(
                side,
                mid,
                spread,
                &snapshot,
                now_sec,
                self.last_alert[side.index()],
                &self.config.gate,
            );
            if decision.allowed {
                self.last_alert[side.index()] = Some(now_sec);
                info!(
                    symbol = %self.symbol,
                    %side,
                    mid,
                    spread,
                    reasons = ?decision.reasons,
                    "alert fired"
                );
                alerts.push(AlertEvent::new(
                    self.symbol.clone(),
                    &decision,
                    mid,
                    spread,
                    now_sec,
                    snapshot.clone(),
                ));
            } else {
                debug!(
                    symbol = %self.symbol,
                    %side,
                    reason = decision.blocking_reason().unwrap_or_default(),
                    "alert blocked"
                );
            }
            decisions.push(decision);
        }

        self.last_snapshot = Some(snapshot.clone());
        Evaluation {
            symbol: self.symbol.clone(),
            now_sec,
            mid,
            spread,
            snapshot,
            decisions,
            alerts,
        }
    }

    // ── Read accessors ──────────────────────────────────────────────────

    fn series(&self, tf: Timeframe) -> &Series {
        match tf {
            Timeframe::Trigger => &self.trigger,
            Timeframe::Context => &self.context,
            Timeframe::Bias => &self.bias,
        }
    }

    /// Current indicator readings for a timeframe.
    pub fn features(&self, tf: Timeframe) -> TimeframeFeatures {
        self.series(tf).bank.features(self.config.strict_warmup)
    }

    pub fn last_candle(&self, tf: Timeframe) -> Option<&Candle> {
        self.series(tf).bank.last_candle()
    }

    pub fn candles_seen(&self, tf: Timeframe) -> u64 {
        self.series(tf).bank.candles_seen()
    }

    pub fn last_snapshot(&self) -> Option<&ContextSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn last_alert(&self, side: Side) -> Option<i64> {
        self.last_alert[side.index()]
    }

    pub fn alert_state(&self, side: Side, now_sec: i64) -> AlertState {
        AlertState::at(
            now_sec,
            self.last_alert[side.index()],
            self.config.gate.cooldown_window(),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::{
        GateConfig, IndicatorPeriods, RsiRange, StageToggles, TimeframeWidths,
    };

    fn small_config() -> InstrumentConfig {
        InstrumentConfig {
            timeframes: TimeframeWidths {
                trigger_width_sec: 60,
                context_width_sec: 120,
                bias_width_sec: 240,
            },
            indicators: IndicatorPeriods {
                ema_fast_period: 2,
                ema_slow_period: 4,
                rsi_period: 3,
                macd_fast_period: 2,
                macd_slow_period: 4,
                macd_signal_period: 2,
                vol_baseline_period: 3,
                bias_ema_period: 2,
            },
            gate: GateConfig::default(),
            strict_warmup: false,
            heartbeat_grace_sec: 3,
        }
    }

    /// Gate with every filtering stage off: only cooldown and spread apply.
    fn open_gate_config() -> InstrumentConfig {
        let mut cfg = small_config();
        cfg.gate.stages = StageToggles {
            trend: false,
            volume: false,
            bias: false,
            oscillator: false,
            momentum: false,
        };
        cfg.gate.cooldown_window_sec = 600;
        cfg
    }

    fn tick(time_sec: i64, price: f64, qty: f64) -> Tick {
        Tick {
            symbol: "BTCUSDT".into(),
            time_ms: time_sec * 1000,
            price,
            quantity: qty,
            buyer_is_maker: None,
        }
    }

    /// Rising prices with a growing trade every 20 s.
    fn tape(n: i64) -> Vec<Tick> {
        (0..n)
            .map(|i| tick(i * 20, 100.0 + (i as f64) * 0.1, 1.0 + (i % 7) as f64))
            .collect()
    }

    #[test]
    fn trades_inside_one_bucket_do_not_evaluate() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        assert!(rt.on_trade(&tick(0, 100.0, 1.0)).is_none());
        assert!(rt.on_trade(&tick(59, 101.0, 1.0)).is_none());
        assert!(rt.last_candle(Timeframe::Trigger).is_none());
        assert!(rt.last_snapshot().is_none());
    }

    #[test]
    fn trigger_close_evaluates_both_sides() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        rt.on_quote(99.99, 100.01);
        rt.on_trade(&tick(0, 100.0, 1.0));
        let eval = rt.on_trade(&tick(60, 100.0, 1.0)).unwrap();
        assert_eq!(eval.decisions.len(), 2);
        assert_eq!(eval.decisions[0].side, Side::Long);
        assert_eq!(eval.decisions[1].side, Side::Short);
        assert_eq!(eval.snapshot.time_sec, 59);
        assert_eq!(eval.now_sec, 60);
        assert!((eval.mid - 100.0).abs() < 1e-12);
        assert_eq!(rt.last_snapshot(), Some(&eval.snapshot));
    }

    #[test]
    fn higher_timeframes_close_before_trigger_evaluates() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        rt.on_trade(&tick(0, 100.0, 1.0));
        // t=240 closes the trigger, context and bias buckets at once.
        let eval = rt.on_trade(&tick(240, 110.0, 1.0)).unwrap();
        assert_eq!(rt.candles_seen(Timeframe::Bias), 1);
        assert_eq!(eval.snapshot.bias_ema, Some(100.0));
        assert_eq!(eval.snapshot.ema_fast, Some(100.0));
    }

    #[test]
    fn quote_mid_drives_candles_and_trade_price_is_the_fallback() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        rt.on_trade(&tick(0, 50.0, 1.0));
        rt.on_quote(99.0, 101.0);
        rt.on_trade(&tick(10, 50.0, 1.0));
        let eval = rt.on_trade(&tick(60, 50.0, 1.0)).unwrap();
        let c = rt.last_candle(Timeframe::Trigger).unwrap();
        assert_eq!(c.open, 50.0);
        assert_eq!(c.close, 100.0);
        assert_eq!(c.volume, 2.0);
        assert!((eval.spread - 0.02).abs() < 1e-12);
    }

    #[test]
    fn missing_quote_fails_closed_on_spread() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(open_gate_config()));
        rt.on_trade(&tick(0, 100.0, 1.0));
        let eval = rt.on_trade(&tick(60, 100.0, 1.0)).unwrap();
        assert_eq!(eval.spread, SPREAD_UNAVAILABLE);
        assert!(eval.alerts.is_empty());
        for d in &eval.decisions {
            assert_eq!(d.reasons, vec!["spread too wide"]);
        }
    }

    #[test]
    fn invalid_quotes_are_dropped() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        assert!(rt.on_quote(100.0, 100.1));
        assert!(!rt.on_quote(0.0, 100.1));
        assert!(!rt.on_quote(f64::NAN, 100.1));
        assert!(!rt.on_quote(101.0, 100.0));
        assert_eq!(rt.quote(), Some(Quote { bid: 100.0, ask: 100.1 }));
    }

    #[test]
    fn invalid_trades_leave_state_untouched() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        rt.on_trade(&tick(0, 100.0, 1.0));
        assert!(rt.on_trade(&tick(60, f64::NAN, 1.0)).is_none());
        assert!(rt.on_trade(&tick(60, 100.0, -1.0)).is_none());
        assert!(rt.on_trade(&tick(60, -5.0, 1.0)).is_none());
        assert!(rt.last_candle(Timeframe::Trigger).is_none());
    }

    #[test]
    fn alert_starts_per_side_cooldown() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(open_gate_config()));
        rt.on_quote(99.999, 100.001);
        rt.on_trade(&tick(0, 100.0, 1.0));

        let eval = rt.on_trade(&tick(60, 100.0, 1.0)).unwrap();
        assert_eq!(eval.alerts.len(), 2);
        assert_eq!(eval.alerts[0].id, "BTCUSDT-LONG-60");
        assert_eq!(rt.alert_state(Side::Long, 60), AlertState::Cooldown);
        assert_eq!(rt.alert_state(Side::Short, 60), AlertState::Cooldown);

        let eval = rt.on_trade(&tick(120, 100.0, 1.0)).unwrap();
        assert!(eval.alerts.is_empty());
        assert_eq!(eval.decisions[0].reasons, vec!["cooldown active"]);

        // Cooldown ends by elapsed time alone.
        assert_eq!(rt.alert_state(Side::Long, 660), AlertState::Armed);
        let eval = rt.on_trade(&tick(660, 100.0, 1.0)).unwrap();
        assert_eq!(eval.alerts.len(), 2);
        assert_eq!(rt.last_alert(Side::Short), Some(660));
    }

    #[test]
    fn heartbeat_closes_quiet_candles() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        assert!(rt.on_heartbeat(100).is_none());

        rt.on_trade(&tick(0, 100.0, 3.0));
        // Inside the grace margin the bucket stays open.
        assert!(rt.on_heartbeat(62).is_none());
        let eval = rt.on_heartbeat(64).unwrap();
        assert_eq!(eval.now_sec, 61);
        assert_eq!(eval.snapshot.close, 100.0);
        assert_eq!(eval.snapshot.volume, 3.0);

        // The heartbeat-opened bucket carries no volume.
        rt.on_heartbeat(124);
        assert_eq!(rt.last_candle(Timeframe::Trigger).unwrap().volume, 0.0);
    }

    #[test]
    fn heartbeat_keeps_bucket_open_for_late_trades() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        let early = Tick {
            time_ms: 10_900,
            ..tick(0, 100.0, 1.0)
        };
        rt.on_trade(&early);
        assert!(rt.on_heartbeat(60).is_none());

        // Stamped before the minute boundary, delivered after it.
        let late = Tick {
            time_ms: 59_900,
            ..tick(0, 100.0, 50.0)
        };
        assert!(rt.on_trade(&late).is_none());

        let eval = rt.on_trade(&tick(61, 100.0, 1.0)).unwrap();
        assert_eq!(eval.snapshot.time_sec, 59);
        assert_eq!(eval.snapshot.volume, 51.0);
    }

    #[test]
    fn heartbeat_waits_for_the_first_trade() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        rt.on_quote(99.99, 100.01);
        assert!(rt.on_heartbeat(10).is_none());
        assert!(rt.on_heartbeat(200).is_none());
        assert_eq!(rt.candles_seen(Timeframe::Trigger), 0);
        assert!(rt.last_candle(Timeframe::Trigger).is_none());
    }

    #[test]
    fn rising_tape_with_volume_spike_passes_every_stage() {
        let mut cfg = small_config();
        cfg.timeframes = TimeframeWidths {
            trigger_width_sec: 60,
            context_width_sec: 60,
            bias_width_sec: 60,
        };
        cfg.gate.rsi_long_range = RsiRange { min: 50.0, max: 90.0 };
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(cfg));

        // Up 1.5, down 0.5, repeated.  Only the last candle has a volume spike.
        let mut price = 100.0;
        let mut evals = Vec::new();
        for k in 0..12 {
            let qty = if k == 11 { 10.0 } else { 1.0 };
            rt.on_quote(price - 0.01, price + 0.01);
            evals.extend(rt.on_trade(&tick(k * 60 + 1, price, qty)));
            price += if k % 2 == 0 { 1.5 } else { -0.5 };
        }
        assert_eq!(evals.len(), 11);
        assert!(evals.iter().all(|e| e.alerts.is_empty()));

        rt.on_quote(106.99, 107.01);
        let eval = rt.on_trade(&tick(12 * 60 + 1, 107.0, 1.0)).unwrap();
        assert!((eval.snapshot.close - 106.5).abs() < 1e-9);
        assert_eq!(eval.snapshot.vol_ratio, Some(2.5));

        let long = &eval.decisions[0];
        assert!(long.allowed, "{:?}", long.reasons);
        assert_eq!(long.reasons.len(), 5);
        assert!(long.reasons[0].starts_with("trend gap"));
        assert!(long.reasons[1].starts_with("volume ratio 2.50"));
        assert!(long.reasons[2].starts_with("mid 107.0000 > bias bound"));
        assert!(long.reasons[3].starts_with("trigger rsi"));
        assert!(long.reasons[4].starts_with("macd hist"));

        let short = &eval.decisions[1];
        assert!(!short.allowed);
        assert_eq!(short.reasons, vec!["trend against side"]);

        assert_eq!(eval.alerts.len(), 1);
        assert_eq!(eval.alerts[0].side, Side::Long);
        assert_eq!(rt.alert_state(Side::Long, 12 * 60 + 1), AlertState::Cooldown);
    }

    #[test]
    fn strict_warmup_hides_cold_indicators() {
        let mut cfg = small_config();
        cfg.strict_warmup = true;
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(cfg));
        rt.on_trade(&tick(0, 100.0, 1.0));
        let eval = rt.on_trade(&tick(60, 101.0, 1.0)).unwrap();
        assert!(eval.snapshot.rsi_trigger.is_none());
        assert!(eval.snapshot.ema_fast.is_none());
        assert_eq!(eval.decisions[0].reasons.last().unwrap(), "spread too wide");
    }

    #[test]
    fn replay_is_deterministic() {
        let cfg = Arc::new(small_config());
        let run = |ticks: &[Tick]| {
            let mut rt = InstrumentRuntime::new("BTCUSDT", cfg.clone());
            rt.on_quote(99.95, 100.05);
            ticks
                .iter()
                .filter_map(|t| rt.on_trade(t))
                .collect::<Vec<_>>()
        };
        let ticks = tape(200);
        let a = run(&ticks);
        let b = run(&ticks);
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn state_survives_a_feed_gap() {
        let mut rt = InstrumentRuntime::new("BTCUSDT", Arc::new(small_config()));
        for t in tape(30) {
            rt.on_trade(&t);
        }
        let seen = rt.candles_seen(Timeframe::Trigger);
        // A reconnect after ten quiet minutes resumes on the same runtime.
        rt.on_trade(&tick(30 * 20 + 600, 105.0, 1.0));
        assert_eq!(rt.candles_seen(Timeframe::Trigger), seen + 1);
        assert!(rt.features(Timeframe::Trigger).rsi.is_some());
    }
}
