// =============================================================================
// Relative Strength Index (RSI) — streaming, Wilder's smoothing
// =============================================================================
//
// On every close:
//   change = close - prev_close
//   gain   = max(change, 0),  loss = max(-change, 0)
//
// The first gain/loss pair seeds the averages.  After that:
//   avg = (avg * (period - 1) + sample) / period
//
//   RSI = 100 - 100 / (1 + avg_gain / (avg_loss + EPS))
//   RSI = 100 when avg_loss == 0
//
// The first close only records the reference price; the value is not ready
// until a change has been observed.
// =============================================================================

/// Guards the gain/loss ratio against a vanishing denominator.
const EPS: f64 = 1e-12;

/// Value reported by [`Rsi::value_or_neutral`] while warming up.
pub const NEUTRAL: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    changes: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            changes: 0,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Feed one close and return the updated RSI (if ready).
    pub fn update(&mut self, close: f64) -> Option<f64> {
        if !close.is_finite() {
            return self.value();
        }
        let prev = self.prev_close.replace(close)?;

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if self.changes == 0 {
            self.avg_gain = gain;
            self.avg_loss = loss;
        } else {
            let p = self.period as f64;
            self.avg_gain = (self.avg_gain * (p - 1.0) + gain) / p;
            self.avg_loss = (self.avg_loss * (p - 1.0) + loss) / p;
        }
        self.changes += 1;

        self.value()
    }

    /// Current RSI in `[0, 100]`, or `None` before the first change.
    pub fn value(&self) -> Option<f64> {
        if self.changes == 0 {
            return None;
        }
        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / (self.avg_loss + EPS);
        Some((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
    }

    /// Current RSI, or the neutral 50 while not ready.
    pub fn value_or_neutral(&self) -> f64 {
        self.value().unwrap_or(NEUTRAL)
    }

    /// `true` once `period` changes have been folded in.
    pub fn is_warm(&self) -> bool {
        self.changes >= self.period
    }
}
