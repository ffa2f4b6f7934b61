// =============================================================================
// Runtime Configuration — immutable engine settings
// =============================================================================
//
// Every tunable lives here.  The configuration is loaded once at startup
// (JSON file, then environment overrides), validated, and handed to each
// instrument as an `Arc<InstrumentConfig>`.  Nothing mutates it afterwards.
//
// All fields carry `#[serde(default)]` so that a partial file only overrides
// what it names.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Side, Timeframe};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    [
        "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "DOGEUSDT", "ADAUSDT",
        "AVAXUSDT", "LINKUSDT", "LTCUSDT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ws_base_url() -> String {
    "wss://fstream.binance.com/stream".to_string()
}

fn default_alert_channel_capacity() -> usize {
    256
}

fn default_trigger_width_sec() -> u64 {
    300
}

fn default_context_width_sec() -> u64 {
    900
}

fn default_bias_width_sec() -> u64 {
    3600
}

fn default_ema_fast_period() -> usize {
    20
}

fn default_ema_slow_period() -> usize {
    50
}

fn default_rsi_period() -> usize {
    14
}

fn default_macd_fast_period() -> usize {
    12
}

fn default_macd_slow_period() -> usize {
    26
}

fn default_macd_signal_period() -> usize {
    9
}

fn default_vol_baseline_period() -> usize {
    20
}

fn default_bias_ema_period() -> usize {
    50
}

fn default_regime_gap_min() -> f64 {
    0.0008
}

fn default_vol_ratio_min() -> f64 {
    1.3
}

fn default_rsi_long_range() -> RsiRange {
    RsiRange { min: 40.0, max: 55.0 }
}

fn default_rsi_short_range() -> RsiRange {
    RsiRange { min: 45.0, max: 65.0 }
}

fn default_macd_tolerance() -> f64 {
    0.0015
}

fn default_cooldown_window_sec() -> u64 {
    600
}

fn default_spread_max() -> f64 {
    0.001
}

fn default_heartbeat_grace_sec() -> u64 {
    3
}

fn default_telegram_retries() -> u32 {
    2
}

fn default_telegram_timeout_sec() -> u64 {
    10
}

// =============================================================================
// Timeframes & indicator periods
// =============================================================================

/// Candle widths (seconds) for the three series kept per instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeWidths {
    #[serde(default = "default_trigger_width_sec")]
    pub trigger_width_sec: u64,

    #[serde(default = "default_context_width_sec")]
    pub context_width_sec: u64,

    #[serde(default = "default_bias_width_sec")]
    pub bias_width_sec: u64,
}

impl Default for TimeframeWidths {
    fn default() -> Self {
        Self {
            trigger_width_sec: default_trigger_width_sec(),
            context_width_sec: default_context_width_sec(),
            bias_width_sec: default_bias_width_sec(),
        }
    }
}

impl TimeframeWidths {
    pub fn width_of(&self, tf: Timeframe) -> u64 {
        match tf {
            Timeframe::Trigger => self.trigger_width_sec,
            Timeframe::Context => self.context_width_sec,
            Timeframe::Bias => self.bias_width_sec,
        }
    }
}

/// Look-back periods for the indicator bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPeriods {
    #[serde(default = "default_ema_fast_period")]
    pub ema_fast_period: usize,

    #[serde(default = "default_ema_slow_period")]
    pub ema_slow_period: usize,

    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    #[serde(default = "default_macd_fast_period")]
    pub macd_fast_period: usize,

    #[serde(default = "default_macd_slow_period")]
    pub macd_slow_period: usize,

    #[serde(default = "default_macd_signal_period")]
    pub macd_signal_period: usize,

    #[serde(default = "default_vol_baseline_period")]
    pub vol_baseline_period: usize,

    /// Trend average period on the bias timeframe.
    #[serde(default = "default_bias_ema_period")]
    pub bias_ema_period: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            ema_fast_period: default_ema_fast_period(),
            ema_slow_period: default_ema_slow_period(),
            rsi_period: default_rsi_period(),
            macd_fast_period: default_macd_fast_period(),
            macd_slow_period: default_macd_slow_period(),
            macd_signal_period: default_macd_signal_period(),
            vol_baseline_period: default_vol_baseline_period(),
            bias_ema_period: default_bias_ema_period(),
        }
    }
}

// =============================================================================
// Gate thresholds
// =============================================================================

/// Inclusive oscillator band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiRange {
    pub min: f64,
    pub max: f64,
}

impl RsiRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Switches for gate stages 3-7.  Cooldown and spread are always enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageToggles {
    #[serde(default = "default_true")]
    pub trend: bool,

    #[serde(default = "default_true")]
    pub volume: bool,

    #[serde(default = "default_true")]
    pub bias: bool,

    #[serde(default = "default_true")]
    pub oscillator: bool,

    #[serde(default = "default_true")]
    pub momentum: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            trend: true,
            volume: true,
            bias: true,
            oscillator: true,
            momentum: true,
        }
    }
}

/// Thresholds consumed by the alert gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum `|ema_fast - ema_slow| / mid`.
    #[serde(default = "default_regime_gap_min")]
    pub regime_gap_min: f64,

    /// Minimum candle volume / baseline volume.
    #[serde(default = "default_vol_ratio_min")]
    pub vol_ratio_min: f64,

    /// Fractional band around the bias average.
    #[serde(default)]
    pub bias_tolerance: f64,

    #[serde(default = "default_rsi_long_range")]
    pub rsi_long_range: RsiRange,

    #[serde(default = "default_rsi_short_range")]
    pub rsi_short_range: RsiRange,

    /// Which timeframe's RSI feeds the oscillator stage.
    #[serde(default)]
    pub oscillator_timeframe: Timeframe,

    /// How far the MACD histogram may lean against the proposed side.
    #[serde(default = "default_macd_tolerance")]
    pub macd_tolerance: f64,

    #[serde(default = "default_cooldown_window_sec")]
    pub cooldown_window_sec: u64,

    /// Maximum `(ask - bid) / mid`.
    #[serde(default = "default_spread_max")]
    pub spread_max: f64,

    #[serde(default)]
    pub stages: StageToggles,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            regime_gap_min: default_regime_gap_min(),
            vol_ratio_min: default_vol_ratio_min(),
            bias_tolerance: 0.0,
            rsi_long_range: default_rsi_long_range(),
            rsi_short_range: default_rsi_short_range(),
            oscillator_timeframe: Timeframe::Trigger,
            macd_tolerance: default_macd_tolerance(),
            cooldown_window_sec: default_cooldown_window_sec(),
            spread_max: default_spread_max(),
            stages: StageToggles::default(),
        }
    }
}

impl GateConfig {
    pub fn rsi_range(&self, side: Side) -> RsiRange {
        match side {
            Side::Long => self.rsi_long_range,
            Side::Short => self.rsi_short_range,
        }
    }

    pub fn cooldown_window(&self) -> i64 {
        i64::try_from(self.cooldown_window_sec).unwrap_or(i64::MAX)
    }
}

// =============================================================================
// InstrumentConfig
// =============================================================================

/// Everything one instrument runtime needs, supplied at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default)]
    pub timeframes: TimeframeWidths,

    #[serde(default)]
    pub indicators: IndicatorPeriods,

    #[serde(default)]
    pub gate: GateConfig,

    /// When set, trend, oscillator and momentum features stay "not ready"
    /// until their calculators have seen a full period.
    #[serde(default)]
    pub strict_warmup: bool,

    /// How far behind the exchange clock heartbeat samples are placed, so a
    /// trade delivered up to this late still counts toward its candle.
    #[serde(default = "default_heartbeat_grace_sec")]
    pub heartbeat_grace_sec: u64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            timeframes: TimeframeWidths::default(),
            indicators: IndicatorPeriods::default(),
            gate: GateConfig::default(),
            strict_warmup: false,
            heartbeat_grace_sec: default_heartbeat_grace_sec(),
        }
    }
}

impl InstrumentConfig {
    /// Reject configurations the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        let tf = &self.timeframes;
        if tf.trigger_width_sec == 0 || tf.context_width_sec == 0 || tf.bias_width_sec == 0 {
            bail!("timeframe widths must be > 0");
        }
        if tf.trigger_width_sec > tf.context_width_sec || tf.context_width_sec > tf.bias_width_sec {
            bail!(
                "timeframes must satisfy trigger <= context <= bias (got {}/{}/{})",
                tf.trigger_width_sec,
                tf.context_width_sec,
                tf.bias_width_sec
            );
        }

        let p = &self.indicators;
        let periods = [
            ("ema_fast_period", p.ema_fast_period),
            ("ema_slow_period", p.ema_slow_period),
            ("rsi_period", p.rsi_period),
            ("macd_fast_period", p.macd_fast_period),
            ("macd_slow_period", p.macd_slow_period),
            ("macd_signal_period", p.macd_signal_period),
            ("vol_baseline_period", p.vol_baseline_period),
            ("bias_ema_period", p.bias_ema_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, v)| *v == 0) {
            bail!("{name} must be > 0");
        }

        let g = &self.gate;
        for (name, value) in [
            ("regime_gap_min", g.regime_gap_min),
            ("vol_ratio_min", g.vol_ratio_min),
            ("bias_tolerance", g.bias_tolerance),
            ("macd_tolerance", g.macd_tolerance),
            ("spread_max", g.spread_max),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a finite non-negative number (got {value})");
            }
        }
        for (name, range) in [
            ("rsi_long_range", g.rsi_long_range),
            ("rsi_short_range", g.rsi_short_range),
        ] {
            if !(0.0..=100.0).contains(&range.min)
                || !(0.0..=100.0).contains(&range.max)
                || range.min > range.max
            {
                bail!("{name} must satisfy 0 <= min <= max <= 100 (got {range:?})");
            }
        }
        if g.oscillator_timeframe == Timeframe::Bias {
            bail!("oscillator_timeframe must be trigger or context");
        }
        Ok(())
    }
}

// =============================================================================
// Collaborator settings
// =============================================================================

/// Alert delivery settings.  Credentials come from the environment only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_telegram_retries")]
    pub retries: u32,

    #[serde(default = "default_telegram_timeout_sec")]
    pub timeout_sec: u64,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retries: default_telegram_retries(),
            timeout_sec: default_telegram_timeout_sec(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level process configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Instruments to track.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Combined-stream websocket endpoint.
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Settings applied to every symbol without an override.
    #[serde(default)]
    pub instrument: InstrumentConfig,

    /// Full per-symbol replacements of `instrument`.
    #[serde(default)]
    pub overrides: HashMap<String, InstrumentConfig>,

    /// Bounded capacity of the alert channel to the sink.
    #[serde(default = "default_alert_channel_capacity")]
    pub alert_channel_capacity: usize,

    /// Seconds between heartbeat samples; 0 disables the heartbeat.
    #[serde(default)]
    pub heartbeat_sec: u64,

    #[serde(default)]
    pub telegram: TelegramSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            ws_base_url: default_ws_base_url(),
            instrument: InstrumentConfig::default(),
            overrides: HashMap::new(),
            alert_channel_capacity: default_alert_channel_capacity(),
            heartbeat_sec: 0,
            telegram: TelegramSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = config.symbols.len(),
            overrides = config.overrides.len(),
            "config loaded"
        );

        Ok(config)
    }

    /// Apply `PULSE_SYMBOLS` (comma separated) and `PULSE_WS_URL`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(syms) = lookup("PULSE_SYMBOLS") {
            let parsed: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
        if let Some(url) = lookup("PULSE_WS_URL") {
            let url = url.trim();
            if !url.is_empty() {
                self.ws_base_url = url.to_string();
            }
        }
    }

    /// Validate the default instrument settings and every override.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("no symbols configured");
        }
        if self.alert_channel_capacity == 0 {
            bail!("alert_channel_capacity must be > 0");
        }
        self.instrument
            .validate()
            .context("invalid default instrument config")?;
        for (symbol, cfg) in &self.overrides {
            cfg.validate()
                .with_context(|| format!("invalid override for {symbol}"))?;
        }
        Ok(())
    }

    /// Settings for `symbol`: its override if present, otherwise the default.
    pub fn instrument_for(&self, symbol: &str) -> &InstrumentConfig {
        self.overrides.get(symbol).unwrap_or(&self.instrument)
    }
}
