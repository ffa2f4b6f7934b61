// =============================================================================
// Indicator Bank — every calculator for one (instrument, timeframe)
// =============================================================================
//
// A flat struct: the indicator set is fixed, so there is no trait object or
// registry.  Each closed candle is pushed through all calculators; readers pull
// a `TimeframeFeatures` view with `None` for anything not ready.
// =============================================================================

use serde::{Deserialize, Serialize};

use super::ema::Ema;
use super::macd::Macd;
use super::rsi::Rsi;
use super::volume::{DirectionalVolume, VolumeSma};
use crate::market_data::Candle;
use crate::runtime_config::IndicatorPeriods;

/// Denominator floor for the volume ratio when the baseline is zero.
const VOLUME_EPS: f64 = 1e-12;

/// Indicator values for one timeframe at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeframeFeatures {
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    /// Trend average with `bias_ema_period`.
    pub trend_ema: Option<f64>,
    pub rsi: Option<f64>,
    pub macd_hist: Option<f64>,
    pub vol_ratio: Option<f64>,
    pub vol_dir: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct IndicatorBank {
    ema_fast: Ema,
    ema_slow: Ema,
    trend_ema: Ema,
    rsi: Rsi,
    macd: Macd,
    vol_baseline: VolumeSma,
    vol_dir: DirectionalVolume,
    vol_ratio: Option<f64>,
    last_candle: Option<Candle>,
    candles_seen: u64,
}

impl IndicatorBank {
    pub fn new(periods: &IndicatorPeriods) -> Self {
        Self {
            ema_fast: Ema::new(periods.ema_fast_period),
            ema_slow: Ema::new(periods.ema_slow_period),
            trend_ema: Ema::new(periods.bias_ema_period),
            rsi: Rsi::new(periods.rsi_period),
            macd: Macd::new(
                periods.macd_fast_period,
                periods.macd_slow_period,
                periods.macd_signal_period,
            ),
            vol_baseline: VolumeSma::new(periods.vol_baseline_period),
            vol_dir: DirectionalVolume::new(),
            vol_ratio: None,
            last_candle: None,
            candles_seen: 0,
        }
    }

    /// Fold one closed candle into every calculator.
    pub fn on_candle(&mut self, candle: &Candle) {
        let close = candle.close;
        self.ema_fast.update(close);
        self.ema_slow.update(close);
        self.trend_ema.update(close);
        self.rsi.update(close);
        self.macd.update(close);

        // The baseline includes the candle being measured.
        if let Some(baseline) = self.vol_baseline.update(candle.volume) {
            self.vol_ratio = Some(candle.volume / baseline.max(VOLUME_EPS));
        }
        self.vol_dir.update(close, candle.volume);

        self.last_candle = Some(candle.clone());
        self.candles_seen += 1;
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.last_candle.as_ref()
    }

    pub fn candles_seen(&self) -> u64 {
        self.candles_seen
    }

    /// Current readings.  With `strict`, EMA/RSI/MACD values stay `None`
    /// until their calculators have seen a full period.
    pub fn features(&self, strict: bool) -> TimeframeFeatures {
        let gate = |warm: bool, v: Option<f64>| if strict && !warm { None } else { v };
        TimeframeFeatures {
            ema_fast: gate(self.ema_fast.is_warm(), self.ema_fast.value()),
            ema_slow: gate(self.ema_slow.is_warm(), self.ema_slow.value()),
            trend_ema: gate(self.trend_ema.is_warm(), self.trend_ema.value()),
            rsi: gate(self.rsi.is_warm(), self.rsi.value()),
            macd_hist: gate(self.macd.is_warm(), self.macd.hist()),
            vol_ratio: self.vol_ratio,
            vol_dir: self.vol_dir.value(),
        }
    }
}
