// =============================================================================
// Alert Gate — deterministic fail-fast decision for one side
// =============================================================================
//
// Stage order is fixed:
//   1. Cooldown     per-side quiet period after an alert
//   2. Spread       quote quality
//   3. Trend        context EMA gap and direction
//   4. Volume       trigger volume spike and direction
//   5. Bias         higher-timeframe trend average
//   6. Oscillator   RSI inside the side's band
//   7. Momentum     context MACD histogram
//
// Cooldown and spread are preconditions: they add a reason only when they
// fail.  Stages 3-7 each add one justification when they pass, or
// "<stage> disabled" when switched off in config.  The first failing stage
// ends evaluation with its fixed short phrase.
// =============================================================================

use serde::Serialize;
use tracing::trace;

use crate::context::ContextSnapshot;
use crate::decision_envelope::{AlertDecision, GateStage};
use crate::runtime_config::GateConfig;
use crate::types::Side;

/// Per-side alert state.  Transitions on fire and on elapsed time only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertState {
    Armed,
    Cooldown,
}

impl AlertState {
    pub fn at(now_sec: i64, last_alert_sec: Option<i64>, window_sec: i64) -> Self {
        match last_alert_sec {
            Some(last) if now_sec.saturating_sub(last) < window_sec => Self::Cooldown,
            _ => Self::Armed,
        }
    }
}

/// Evaluate every stage for `side`.  Pure: the same inputs always produce the
/// same decision.
pub fn evaluate(
    side: Side,
    mid: f64,
    spread: f64,
    ctx: &ContextSnapshot,
    now_sec: i64,
    last_alert_sec: Option<i64>,
    cfg: &GateConfig,
) -> AlertDecision {
    let mut reasons: Vec<String> = Vec::with_capacity(5);
    let long = side == Side::Long;

    // ── 1. Cooldown ──────────────────────────────────────────────────────
    if AlertState::at(now_sec, last_alert_sec, cfg.cooldown_window()) == AlertState::Cooldown {
        return AlertDecision::deny(side, GateStage::Cooldown, reasons, "cooldown active");
    }

    // ── 2. Spread ────────────────────────────────────────────────────────
    if spread.is_nan() || spread > cfg.spread_max {
        return AlertDecision::deny(side, GateStage::Spread, reasons, "spread too wide");
    }

    // ── 3. Trend ─────────────────────────────────────────────────────────
    if cfg.stages.trend {
        let (fast, slow) = match (ctx.ema_fast, ctx.ema_slow) {
            (Some(f), Some(s)) if mid > 0.0 => (f, s),
            _ => return AlertDecision::deny(side, GateStage::Trend, reasons, "trend not ready"),
        };
        let gap = (fast - slow).abs() / mid;
        if gap < cfg.regime_gap_min {
            return AlertDecision::deny(side, GateStage::Trend, reasons, "trend gap too small");
        }
        let aligned = if long { fast > slow } else { fast < slow };
        if !aligned {
            return AlertDecision::deny(side, GateStage::Trend, reasons, "trend against side");
        }
        reasons.push(format!(
            "trend gap {:.5} >= {:.5} (ema fast {:.4} {} slow {:.4})",
            gap,
            cfg.regime_gap_min,
            fast,
            if long { ">" } else { "<" },
            slow
        ));
    } else {
        reasons.push("trend disabled".to_string());
    }

    // ── 4. Volume ────────────────────────────────────────────────────────
    if cfg.stages.volume {
        let (ratio, dir) = match (ctx.vol_ratio, ctx.vol_dir) {
            (Some(r), Some(d)) => (r, d),
            _ => return AlertDecision::deny(side, GateStage::Volume, reasons, "volume not ready"),
        };
        if ratio < cfg.vol_ratio_min {
            return AlertDecision::deny(side, GateStage::Volume, reasons, "volume spike too small");
        }
        let aligned = if long { dir > 0.0 } else { dir < 0.0 };
        if !aligned {
            return AlertDecision::deny(
                side,
                GateStage::Volume,
                reasons,
                "volume direction against side",
            );
        }
        reasons.push(format!(
            "volume ratio {:.2} >= {:.2}, directional volume {:.4}",
            ratio, cfg.vol_ratio_min, dir
        ));
    } else {
        reasons.push("volume disabled".to_string());
    }

    // ── 5. Higher-timeframe bias ─────────────────────────────────────────
    if cfg.stages.bias {
        let Some(bias) = ctx.bias_ema else {
            return AlertDecision::deny(side, GateStage::Bias, reasons, "bias not ready");
        };
        let tol = cfg.bias_tolerance;
        let (aligned, bound) = if long {
            let bound = bias * (1.0 - tol);
            (mid > bound, bound)
        } else {
            let bound = bias * (1.0 + tol);
            (mid < bound, bound)
        };
        if !aligned {
            return AlertDecision::deny(side, GateStage::Bias, reasons, "bias against side");
        }
        reasons.push(format!(
            "mid {:.4} {} bias bound {:.4}",
            mid,
            if long { ">" } else { "<" },
            bound
        ));
    } else {
        reasons.push("bias disabled".to_string());
    }

    // ── 6. Oscillator ────────────────────────────────────────────────────
    if cfg.stages.oscillator {
        let Some(rsi) = ctx.rsi(cfg.oscillator_timeframe) else {
            return AlertDecision::deny(
                side,
                GateStage::Oscillator,
                reasons,
                "oscillator not ready",
            );
        };
        let range = cfg.rsi_range(side);
        if !range.contains(rsi) {
            return AlertDecision::deny(
                side,
                GateStage::Oscillator,
                reasons,
                "oscillator out of range",
            );
        }
        reasons.push(format!(
            "{} rsi {:.2} in [{:.1}, {:.1}]",
            cfg.oscillator_timeframe, rsi, range.min, range.max
        ));
    } else {
        reasons.push("oscillator disabled".to_string());
    }

    // ── 7. Momentum ──────────────────────────────────────────────────────
    if cfg.stages.momentum {
        let Some(hist) = ctx.macd_hist else {
            return AlertDecision::deny(side, GateStage::Momentum, reasons, "momentum not ready");
        };
        let tol = cfg.macd_tolerance;
        let against = if long { hist < -tol } else { hist > tol };
        if against {
            return AlertDecision::deny(side, GateStage::Momentum, reasons, "momentum against side");
        }
        reasons.push(format!("macd hist {:.6} within tolerance {:.6}", hist, tol));
    } else {
        reasons.push("momentum disabled".to_string());
    }

    trace!(%side, now_sec, "gate passed");
    AlertDecision::allow(side, reasons)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::{RsiRange, StageToggles};
    use crate::types::Timeframe;

    fn cfg() -> GateConfig {
        GateConfig {
            regime_gap_min: 0.001,
            vol_ratio_min: 1.5,
            bias_tolerance: 0.0,
            rsi_long_range: RsiRange { min: 40.0, max: 60.0 },
            rsi_short_range: RsiRange { min: 40.0, max: 60.0 },
            oscillator_timeframe: Timeframe::Trigger,
            macd_tolerance: 0.01,
            cooldown_window_sec: 600,
            spread_max: 0.001,
            stages: StageToggles::default(),
        }
    }

    /// Snapshot that passes every stage for LONG at mid 100.
    fn bullish() -> ContextSnapshot {
        ContextSnapshot {
            time_sec: 1_000,
            close: 100.0,
            volume: 30.0,
            ema_fast: Some(101.0),
            ema_slow: Some(100.0),
            macd_hist: Some(0.05),
            rsi_trigger: Some(50.0),
            rsi_context: Some(70.0),
            vol_ratio: Some(2.0),
            vol_dir: Some(30.0),
            bias_ema: Some(95.0),
        }
    }

    /// Mirror image of `bullish` for SHORT.
    fn bearish() -> ContextSnapshot {
        ContextSnapshot {
            ema_fast: Some(99.0),
            ema_slow: Some(100.0),
            macd_hist: Some(-0.05),
            vol_dir: Some(-30.0),
            bias_ema: Some(105.0),
            ..bullish()
        }
    }

    fn reason(d: &AlertDecision) -> &str {
        d.blocking_reason().unwrap()
    }

    #[test]
    fn cooldown_blocks_before_anything_else() {
        for now in [0, 1, 599] {
            let d = evaluate(Side::Long, 100.0, 0.0001, &bullish(), now, Some(0), &cfg());
            assert!(!d.allowed);
            assert_eq!(d.reasons, vec!["cooldown active"]);
            assert_eq!(d.blocking_stage, Some(GateStage::Cooldown));
        }
        let d = evaluate(Side::Long, 100.0, 0.0001, &bullish(), 600, Some(0), &cfg());
        assert!(d.allowed);
    }

    #[test]
    fn wide_spread_blocks() {
        let d = evaluate(Side::Long, 100.0, 0.002, &bullish(), 1_000, None, &cfg());
        assert!(!d.allowed);
        assert_eq!(d.reasons, vec!["spread too wide"]);
        assert_eq!(d.blocking_stage, Some(GateStage::Spread));

        let d = evaluate(Side::Long, 100.0, f64::NAN, &bullish(), 1_000, None, &cfg());
        assert_eq!(reason(&d), "spread too wide");
    }

    #[test]
    fn spread_at_limit_passes() {
        let d = evaluate(Side::Long, 100.0, 0.001, &bullish(), 1_000, None, &cfg());
        assert!(d.allowed);
    }

    #[test]
    fn long_passes_with_one_reason_per_stage() {
        let d = evaluate(Side::Long, 100.0, 0.0001, &bullish(), 1_000, None, &cfg());
        assert!(d.allowed, "{:?}", d.reasons);
        assert_eq!(d.reasons.len(), 5);
        assert!(d.reasons[0].starts_with("trend gap"));
        assert!(d.blocking_stage.is_none());
    }

    #[test]
    fn short_passes_on_mirrored_context() {
        let d = evaluate(Side::Short, 100.0, 0.0001, &bearish(), 1_000, None, &cfg());
        assert!(d.allowed, "{:?}", d.reasons);
    }

    #[test]
    fn trend_failures() {
        let mut ctx = bullish();
        ctx.ema_slow = None;
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "trend not ready");
        assert_eq!(d.reasons.len(), 1);

        let mut ctx = bullish();
        ctx.ema_fast = Some(100.05);
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "trend gap too small");

        let d = evaluate(Side::Short, 100.0, 0.0, &bullish(), 1_000, None, &cfg());
        assert_eq!(reason(&d), "trend against side");
        assert_eq!(d.blocking_stage, Some(GateStage::Trend));
    }

    #[test]
    fn volume_failures() {
        let mut ctx = bullish();
        ctx.vol_ratio = None;
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "volume not ready");
        assert_eq!(d.reasons.len(), 2);

        let mut ctx = bullish();
        ctx.vol_ratio = Some(1.49);
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "volume spike too small");

        let mut ctx = bullish();
        ctx.vol_ratio = Some(1.5);
        assert!(evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg()).allowed);

        let mut ctx = bullish();
        ctx.vol_dir = Some(0.0);
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "volume direction against side");
    }

    #[test]
    fn bias_failures_and_tolerance() {
        let mut ctx = bullish();
        ctx.bias_ema = None;
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "bias not ready");

        let mut ctx = bullish();
        ctx.bias_ema = Some(100.5);
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "bias against side");

        // 1% tolerance puts the bound at 99.495, below mid.
        let mut c = cfg();
        c.bias_tolerance = 0.01;
        assert!(evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &c).allowed);
    }

    #[test]
    fn oscillator_failures_and_timeframe_choice() {
        let mut ctx = bullish();
        ctx.rsi_trigger = None;
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "oscillator not ready");

        let mut ctx = bullish();
        ctx.rsi_trigger = Some(60.0001);
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "oscillator out of range");

        // Context RSI is 70 in the fixture.
        let mut c = cfg();
        c.oscillator_timeframe = Timeframe::Context;
        let d = evaluate(Side::Long, 100.0, 0.0, &bullish(), 1_000, None, &c);
        assert_eq!(reason(&d), "oscillator out of range");
    }

    #[test]
    fn momentum_respects_tolerance() {
        let mut ctx = bullish();
        ctx.macd_hist = None;
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "momentum not ready");
        assert_eq!(d.reasons.len(), 5);

        let mut ctx = bullish();
        ctx.macd_hist = Some(-0.01);
        assert!(evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg()).allowed);
        ctx.macd_hist = Some(-0.0101);
        let d = evaluate(Side::Long, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "momentum against side");

        let mut ctx = bearish();
        ctx.macd_hist = Some(0.02);
        let d = evaluate(Side::Short, 100.0, 0.0, &ctx, 1_000, None, &cfg());
        assert_eq!(reason(&d), "momentum against side");
    }

    #[test]
    fn disabled_stages_are_recorded_and_skipped() {
        let mut c = cfg();
        c.stages = StageToggles {
            trend: false,
            volume: false,
            bias: false,
            oscillator: false,
            momentum: false,
        };
        let empty = ContextSnapshot {
            ema_fast: None,
            ema_slow: None,
            macd_hist: None,
            rsi_trigger: None,
            rsi_context: None,
            vol_ratio: None,
            vol_dir: None,
            bias_ema: None,
            ..bullish()
        };
        let d = evaluate(Side::Short, 100.0, 0.0, &empty, 1_000, None, &c);
        assert!(d.allowed);
        assert_eq!(
            d.reasons,
            vec![
                "trend disabled",
                "volume disabled",
                "bias disabled",
                "oscillator disabled",
                "momentum disabled"
            ]
        );
    }

    #[test]
    fn alert_state_transitions_by_time() {
        assert_eq!(AlertState::at(10, None, 600), AlertState::Armed);
        assert_eq!(AlertState::at(10, Some(0), 600), AlertState::Cooldown);
        assert_eq!(AlertState::at(599, Some(0), 600), AlertState::Cooldown);
        assert_eq!(AlertState::at(600, Some(0), 600), AlertState::Armed);
        assert_eq!(AlertState::at(i64::MIN, Some(i64::MAX), 600), AlertState::Cooldown);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let a = evaluate(Side::Long, 100.0, 0.0002, &bullish(), 1_000, Some(100), &cfg());
        let b = evaluate(Side::Long, 100.0, 0.0002, &bullish(), 1_000, Some(100), &cfg());
        assert_eq!(a, b);
    }
}
