// =============================================================================
// Context Snapshot — feature set handed to the alert gate
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::indicators::TimeframeFeatures;
use crate::market_data::Candle;
use crate::types::Timeframe;

/// Features assembled at one trigger-candle close.  `None` means "not ready".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Close time of the trigger candle (inclusive end second).
    pub time_sec: i64,
    pub close: f64,
    pub volume: f64,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub macd_hist: Option<f64>,
    pub rsi_trigger: Option<f64>,
    pub rsi_context: Option<f64>,
    pub vol_ratio: Option<f64>,
    pub vol_dir: Option<f64>,
    pub bias_ema: Option<f64>,
}

impl ContextSnapshot {
    /// Combine the closed trigger candle with the current per-timeframe
    /// readings.
    pub fn assemble(
        candle: &Candle,
        trigger: &TimeframeFeatures,
        context: &TimeframeFeatures,
        bias: &TimeframeFeatures,
    ) -> Self {
        Self {
            time_sec: candle.end_sec,
            close: candle.close,
            volume: candle.volume,
            ema_fast: context.ema_fast,
            ema_slow: context.ema_slow,
            macd_hist: context.macd_hist,
            rsi_trigger: trigger.rsi,
            rsi_context: context.rsi,
            vol_ratio: trigger.vol_ratio,
            vol_dir: trigger.vol_dir,
            bias_ema: bias.trend_ema,
        }
    }

    /// Oscillator reading for the configured timeframe.
    pub fn rsi(&self, timeframe: Timeframe) -> Option<f64> {
        match timeframe {
            Timeframe::Context => self.rsi_context,
            Timeframe::Trigger | Timeframe::Bias => self.rsi_trigger,
        }
    }

    /// Named view of every feature, in stable (alphabetical) order.
    pub fn features(&self) -> BTreeMap<&'static str, Option<f64>> {
        BTreeMap::from([
            ("bias_ema", self.bias_ema),
            ("close", Some(self.close)),
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
            ("macd_hist", self.macd_hist),
            ("rsi_context", self.rsi_context),
            ("rsi_trigger", self.rsi_trigger),
            ("vol_dir", self.vol_dir),
            ("vol_ratio", self.vol_ratio),
            ("volume", Some(self.volume)),
        ])
    }

    /// Names of the features that are not ready yet.
    pub fn missing(&self) -> Vec<&'static str> {
        self.features()
            .into_iter()
            .filter_map(|(name, v)| v.is_none().then_some(name))
            .collect()
    }
}
