// =============================================================================
// Volume indicators — baseline SMA and directional volume
// =============================================================================

use std::collections::VecDeque;

/// Simple moving average over the last `period` candle volumes.
///
/// Maintained with a running sum; the oldest sample is evicted once the window
/// is full.  Before the window fills, the mean is taken over however many
/// samples are held.
#[derive(Debug, Clone)]
pub struct VolumeSma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl VolumeSma {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
        }
    }

    pub fn update(&mut self, volume: f64) -> Option<f64> {
        if !volume.is_finite() {
            return self.value();
        }
        self.window.push_back(volume);
        self.sum += volume;
        while self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            // Running sums can drift a hair below zero after evictions.
            Some((self.sum / self.window.len() as f64).max(0.0))
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.window.len() >= self.period
    }
}

/// Signed candle volume: `+volume` when the close rose against the previous
/// close, `-volume` when it fell, `0` when unchanged or on the first candle.
#[derive(Debug, Clone, Default)]
pub struct DirectionalVolume {
    prev_close: Option<f64>,
    value: Option<f64>,
}

impl DirectionalVolume {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, close: f64, volume: f64) -> f64 {
        if !close.is_finite() || !volume.is_finite() {
            return self.value.unwrap_or(0.0);
        }
        let signed = match self.prev_close {
            Some(prev) if close > prev => volume.abs(),
            Some(prev) if close < prev => -volume.abs(),
            _ => 0.0,
        };
        self.prev_close = Some(close);
        self.value = Some(signed);
        signed
    }

    /// Last signed volume, `None` before any candle.
    pub fn value(&self) -> Option<f64> {
        self.value
    }
}
