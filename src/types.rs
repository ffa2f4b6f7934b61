// =============================================================================
// Shared types used across the Pulse alert engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Spread reported when no usable quote is available. Large enough that the
/// spread stage of the gate always rejects.
pub const SPREAD_UNAVAILABLE: f64 = 1.0;

/// Direction of a proposed alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Both sides in evaluation order.
    pub const ALL: [Side; 2] = [Side::Long, Side::Short];

    /// Stable index for per-side arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Long => 0,
            Self::Short => 1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// The three candle series kept per instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    /// Short series whose closes drive evaluation.
    #[default]
    Trigger,
    /// Medium series supplying trend, oscillator and momentum.
    Context,
    /// Long series supplying the higher-timeframe directional filter.
    Bias,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trigger => write!(f, "trigger"),
            Self::Context => write!(f, "context"),
            Self::Bias => write!(f, "bias"),
        }
    }
}

/// A single trade as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub time_ms: i64,
    pub price: f64,
    pub quantity: f64,
    /// `Some(true)` when the buyer was the maker (taker sold).
    #[serde(default)]
    pub buyer_is_maker: Option<bool>,
}

impl Tick {
    /// Trade time truncated to whole seconds.
    pub fn time_sec(&self) -> i64 {
        self.time_ms.div_euclid(1000)
    }
}

/// Best bid/ask snapshot for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    /// A quote is usable when both sides are finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.bid.is_finite() && self.ask.is_finite() && self.bid > 0.0 && self.ask > 0.0
    }

    pub fn mid(&self) -> Option<f64> {
        if self.is_valid() {
            Some((self.bid + self.ask) / 2.0)
        } else {
            None
        }
    }

    /// `(ask - bid) / mid`, or [`SPREAD_UNAVAILABLE`] when the quote is unusable.
    pub fn spread(&self) -> f64 {
        match self.mid() {
            Some(mid) if mid > 0.0 => (self.ask - self.bid) / mid,
            _ => SPREAD_UNAVAILABLE,
        }
    }
}
