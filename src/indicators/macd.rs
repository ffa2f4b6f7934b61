// =============================================================================
// MACD — Moving Average Convergence / Divergence (streaming)
// =============================================================================
//
//   macd   = EMA(close, fast) - EMA(close, slow)
//   signal = EMA(macd, signal_period)
//   hist   = macd - signal
//
// All three EMAs are independent and fed on every close, so the histogram is
// defined from the first close onward.
// =============================================================================

use super::ema::Ema;

/// One MACD reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub hist: f64,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    last: Option<MacdValue>,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            last: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<MacdValue> {
        if !close.is_finite() {
            return self.last;
        }
        let (Some(fast), Some(slow)) = (self.fast.update(close), self.slow.update(close)) else {
            return self.last;
        };
        let macd = fast - slow;
        let Some(signal) = self.signal.update(macd) else {
            return self.last;
        };
        self.last = Some(MacdValue {
            macd,
            signal,
            hist: macd - signal,
        });
        self.last
    }

    pub fn value(&self) -> Option<MacdValue> {
        self.last
    }

    pub fn hist(&self) -> Option<f64> {
        self.last.map(|v| v.hist)
    }

    /// Warm once each of the three averages has seen a full period.
    pub fn is_warm(&self) -> bool {
        self.fast.is_warm() && self.slow.is_warm() && self.signal.is_warm()
    }
}
