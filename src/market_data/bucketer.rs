// =============================================================================
// Bucketer — folds trade samples into closed fixed-width candles
// =============================================================================
//
// Bucket key = floor(time / width) * width.  A sample in a later bucket closes
// the open candle and seeds a new one.  Skipped buckets are not synthesized:
// only the bucket that was actually open is emitted.  Samples older than the
// open bucket are ignored so that candle starts stay strictly increasing.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::trace;

/// A closed OHLCV candle.  `end_sec` is inclusive (`start_sec + width - 1`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start_sec: i64,
    pub end_sec: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    fn seed(start_sec: i64, width: i64, price: f64, volume: f64) -> Self {
        Self {
            start_sec,
            end_sec: start_sec + width - 1,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    fn absorb(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }
}

/// Streaming candle builder for a single (instrument, timeframe).
#[derive(Debug, Clone)]
pub struct Bucketer {
    width: i64,
    open: Option<Candle>,
}

impl Bucketer {
    /// Create a bucketer with the given width in seconds.  A zero width is
    /// clamped to one second.
    pub fn new(width_sec: u64) -> Self {
        Self {
            width: i64::try_from(width_sec).unwrap_or(i64::MAX).max(1),
            open: None,
        }
    }

    pub fn width_sec(&self) -> i64 {
        self.width
    }

    /// Start of the bucket currently being accumulated.
    pub fn open_start(&self) -> Option<i64> {
        self.open.as_ref().map(|c| c.start_sec)
    }

    /// Volume accumulated so far in the open bucket.
    pub fn open_volume(&self) -> f64 {
        self.open.as_ref().map_or(0.0, |c| c.volume)
    }

    /// Most recent price folded into the open bucket.
    pub fn last_price(&self) -> Option<f64> {
        self.open.as_ref().map(|c| c.close)
    }

    fn bucket_start(&self, time_sec: i64) -> i64 {
        time_sec.div_euclid(self.width) * self.width
    }

    /// Fold one sample.  Returns the closed candle and `true` when the sample
    /// crossed into a later bucket, `(None, false)` otherwise.
    pub fn update(&mut self, time_sec: i64, price: f64, volume: f64) -> (Option<Candle>, bool) {
        if !price.is_finite() || !volume.is_finite() || volume < 0.0 {
            trace!(time_sec, price, volume, "bucketer: malformed sample ignored");
            return (None, false);
        }

        let start = self.bucket_start(time_sec);

        let Some(current) = self.open.as_mut() else {
            self.open = Some(Candle::seed(start, self.width, price, volume));
            return (None, false);
        };

        if start < current.start_sec {
            trace!(
                time_sec,
                open_start = current.start_sec,
                "bucketer: out-of-order sample ignored"
            );
            return (None, false);
        }

        if start == current.start_sec {
            current.absorb(price, volume);
            return (None, false);
        }

        let closed = std::mem::replace(current, Candle::seed(start, self.width, price, volume));
        (Some(closed), true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_sample_seeds_without_closing() {
        let mut b = Bucketer::new(300);
        assert_eq!(b.update(10, 5.0, 1.0), (None, false));
        assert_eq!(b.open_start(), Some(0));
        assert_eq!(b.last_price(), Some(5.0));
    }

    #[test]
    fn closes_bucket_with_expected_ohlcv() {
        let mut b = Bucketer::new(300);
        assert_eq!(b.update(0, 10.0, 1.0), (None, false));
        assert_eq!(b.update(120, 12.0, 2.0), (None, false));

        let (closed, did_close) = b.update(305, 11.0, 1.0);
        assert!(did_close);
        assert_eq!(
            closed,
            Some(Candle {
                start_sec: 0,
                end_sec: 299,
                open: 10.0,
                high: 12.0,
                low: 10.0,
                close: 12.0,
                volume: 3.0,
            })
        );
        assert_eq!(b.open_start(), Some(300));
        assert_eq!(b.last_price(), Some(11.0));
        assert!((b.open_volume() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gap_closes_only_the_open_bucket() {
        let mut b = Bucketer::new(60);
        b.update(5, 1.0, 1.0);
        let (closed, did_close) = b.update(60 * 10 + 1, 2.0, 1.0);
        assert!(did_close);
        let closed = closed.unwrap();
        assert_eq!(closed.start_sec, 0);
        assert_eq!(b.open_start(), Some(600));

        // Next crossing closes the 600 bucket, nothing in between.
        let (closed, _) = b.update(661, 3.0, 1.0);
        assert_eq!(closed.unwrap().start_sec, 600);
    }

    #[test]
    fn out_of_order_sample_is_ignored() {
        let mut b = Bucketer::new(60);
        b.update(125, 10.0, 1.0);
        assert_eq!(b.update(30, 99.0, 5.0), (None, false));
        assert!((b.open_volume() - 1.0).abs() < f64::EPSILON);
        assert_eq!(b.last_price(), Some(10.0));
    }

    #[test]
    fn late_sample_inside_open_bucket_is_accepted() {
        let mut b = Bucketer::new(60);
        b.update(125, 10.0, 1.0);
        assert_eq!(b.update(121, 9.0, 1.0), (None, false));
        assert!((b.open_volume() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_samples_do_not_touch_state() {
        let mut b = Bucketer::new(60);
        b.update(0, 10.0, 1.0);
        b.update(1, f64::NAN, 1.0);
        b.update(2, 11.0, -1.0);
        b.update(3, f64::INFINITY, 1.0);
        assert!((b.open_volume() - 1.0).abs() < f64::EPSILON);
        assert_eq!(b.last_price(), Some(10.0));
    }

    #[test]
    fn heartbeat_with_zero_volume_closes_quiet_bucket() {
        let mut b = Bucketer::new(60);
        b.update(10, 10.0, 4.0);
        let (closed, did_close) = b.update(60, 10.0, 0.0);
        assert!(did_close);
        assert!((closed.unwrap().volume - 4.0).abs() < f64::EPSILON);
        assert!(b.open_volume().abs() < f64::EPSILON);
    }

    #[test]
    fn negative_times_floor_correctly() {
        let mut b = Bucketer::new(60);
        b.update(-1, 1.0, 1.0);
        assert_eq!(b.open_start(), Some(-60));
    }

    proptest! {
        #[test]
        fn same_bucket_aggregates_ohlcv(
            samples in prop::collection::vec((0i64..300, 1.0f64..1_000.0, 0.0f64..50.0), 1..40)
        ) {
            let mut sorted = samples.clone();
            sorted.sort_by_key(|s| s.0);

            let mut b = Bucketer::new(300);
            for &(t, p, v) in &sorted {
                let (closed, did_close) = b.update(t, p, v);
                prop_assert!(closed.is_none());
                prop_assert!(!did_close);
            }
            let (closed, did_close) = b.update(300, 1.0, 0.0);
            prop_assert!(did_close);
            let c = closed.unwrap();

            let max = sorted.iter().map(|s| s.1).fold(f64::MIN, f64::max);
            let min = sorted.iter().map(|s| s.1).fold(f64::MAX, f64::min);
            let vol: f64 = sorted.iter().map(|s| s.2).sum();

            prop_assert_eq!(c.open, sorted[0].1);
            prop_assert_eq!(c.close, sorted[sorted.len() - 1].1);
            prop_assert_eq!(c.high, max);
            prop_assert_eq!(c.low, min);
            prop_assert!((c.volume - vol).abs() < 1e-9);
        }

        #[test]
        fn closed_starts_strictly_increase(times in prop::collection::vec(0i64..5_000, 1..200)) {
            let mut b = Bucketer::new(60);
            let mut last_start: Option<i64> = None;
            for t in times {
                if let (Some(c), true) = b.update(t, 1.0, 1.0) {
                    if let Some(prev) = last_start {
                        prop_assert!(c.start_sec > prev);
                    }
                    prop_assert_eq!(c.end_sec, c.start_sec + 59);
                    last_start = Some(c.start_sec);
                }
            }
        }
    }
}
