// =============================================================================
// Pulse — streaming market-alert engine
// =============================================================================
//
// Trades and quotes in, candles and indicators in the middle, gated LONG /
// SHORT alerts out.  The binary in `main.rs` wires the feed and the Telegram
// sink around the core exported here.
// =============================================================================

pub mod alert_gate;
pub mod app_state;
pub mod context;
pub mod decision_envelope;
pub mod indicators;
pub mod instrument;
pub mod market_data;
pub mod notify;
pub mod runtime_config;
pub mod types;

pub use alert_gate::{evaluate, AlertState};
pub use app_state::AppState;
pub use context::ContextSnapshot;
pub use decision_envelope::{AlertDecision, AlertEvent, GateStage};
pub use instrument::{Evaluation, InstrumentRuntime};
pub use runtime_config::{InstrumentConfig, RuntimeConfig};
pub use types::{Quote, Side, Tick, Timeframe};
