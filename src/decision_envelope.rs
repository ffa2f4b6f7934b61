// =============================================================================
// Decision Envelope — gate verdicts and the alerts they produce
// =============================================================================
//
// Every evaluation produces an `AlertDecision` carrying the ordered reasons
// from each gate stage that ran.  Allowed decisions are turned into an
// `AlertEvent` for the notification collaborator.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::ContextSnapshot;
use crate::types::Side;

/// The seven gate stages, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    Cooldown,
    Spread,
    Trend,
    Volume,
    Bias,
    Oscillator,
    Momentum,
}

impl std::fmt::Display for GateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cooldown => "cooldown",
            Self::Spread => "spread",
            Self::Trend => "trend",
            Self::Volume => "volume",
            Self::Bias => "bias",
            Self::Oscillator => "oscillator",
            Self::Momentum => "momentum",
        };
        f.write_str(name)
    }
}

/// Verdict of one gate evaluation for one side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDecision {
    pub side: Side,
    pub allowed: bool,
    /// One entry per stage that ran, in order; the last entry of a denied
    /// decision is the failing reason.
    pub reasons: Vec<String>,
    /// Stage that denied the alert, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_stage: Option<GateStage>,
}

impl AlertDecision {
    pub fn allow(side: Side, reasons: Vec<String>) -> Self {
        Self {
            side,
            allowed: true,
            reasons,
            blocking_stage: None,
        }
    }

    pub fn deny(side: Side, stage: GateStage, mut reasons: Vec<String>, reason: &str) -> Self {
        reasons.push(reason.to_string());
        Self {
            side,
            allowed: false,
            reasons,
            blocking_stage: Some(stage),
        }
    }

    /// The failing reason of a denied decision.
    pub fn blocking_reason(&self) -> Option<&str> {
        if self.allowed {
            None
        } else {
            self.reasons.last().map(String::as_str)
        }
    }
}

/// Alert emitted to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    /// `<symbol>-<side>-<unix seconds>`; unique per instrument and side
    /// because of the cooldown.
    pub id: String,
    pub symbol: String,
    pub side: Side,
    /// Mid price at evaluation time.
    pub price: f64,
    pub spread: f64,
    pub reasons: Vec<String>,
    pub emitted_at: DateTime<Utc>,
    pub snapshot: ContextSnapshot,
}

impl AlertEvent {
    pub fn new(
        symbol: impl Into<String>,
        decision: &AlertDecision,
        price: f64,
        spread: f64,
        now_sec: i64,
        snapshot: ContextSnapshot,
    ) -> Self {
        let symbol = symbol.into();
        Self {
            id: format!("{}-{}-{}", symbol, decision.side, now_sec),
            symbol,
            side: decision.side,
            price,
            spread,
            reasons: decision.reasons.clone(),
            emitted_at: DateTime::<Utc>::from_timestamp(now_sec, 0).unwrap_or_default(),
            snapshot,
        }
    }
}
