// =============================================================================
// Exponential Moving Average (EMA) — streaming
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = x_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The first sample seeds the value directly, so `value()` is defined from the
// first update onward.  `is_warm()` reports whether `period` samples have been
// seen, for callers that want the average to be meaningful before use.
// =============================================================================

/// Incremental EMA over an unbounded stream.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    multiplier: f64,
    value: Option<f64>,
    samples: usize,
}

impl Ema {
    /// `period == 0` is treated as 1 (no smoothing).
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            value: None,
            samples: 0,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Feed one sample and return the updated average.
    ///
    /// Non-finite samples are ignored; the previous value is returned.
    pub fn update(&mut self, x: f64) -> Option<f64> {
        if !x.is_finite() {
            return self.value;
        }
        let next = match self.value {
            None => x,
            Some(prev) => x * self.multiplier + prev * (1.0 - self.multiplier),
        };
        self.value = Some(next);
        self.samples += 1;
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn is_warm(&self) -> bool {
        self.samples >= self.period
    }
}
