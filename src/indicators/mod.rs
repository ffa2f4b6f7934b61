// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Streaming calculators fed one closed candle at a time.  Each keeps O(1) or
// fixed-window state and reports `None` until it has enough data.

pub mod bank;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod volume;

pub use bank::{IndicatorBank, TimeframeFeatures};
pub use ema::Ema;
pub use macd::{Macd, MacdValue};
pub use rsi::Rsi;
pub use volume::{DirectionalVolume, VolumeSma};
