// =============================================================================
// Market Feed — Binance combined bookTicker / aggTrade streams
// =============================================================================
//
// The feed owns the websocket connections and nothing else.  Each message is
// decoded into a `FeedEvent` and handed to `AppState`; decoding failures are
// logged and dropped.  Disconnects return to the caller, which reconnects
// without touching instrument state.
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::types::Tick;

pub const BOOK_TICKER: &str = "bookTicker";
pub const AGG_TRADE: &str = "aggTrade";

/// One decoded market event.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Quote { symbol: String, bid: f64, ask: f64 },
    Trade(Tick),
}

impl FeedEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Quote { symbol, .. } => symbol,
            Self::Trade(tick) => &tick.symbol,
        }
    }
}

/// Combined-stream URL: `<base>?streams=btcusdt@aggTrade/ethusdt@aggTrade`.
pub fn build_stream_url(base: &str, symbols: &[String], channel: &str) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@{}", s.to_lowercase(), channel))
        .collect();
    format!("{}?streams={}", base.trim_end_matches('/'), streams.join("/"))
}

/// Decode one websocket text frame.
///
/// Accepts both the combined envelope
/// ```json
/// { "stream": "btcusdt@aggTrade", "data": { "s": "BTCUSDT", "p": "37000.0", ... } }
/// ```
/// and a bare payload.  Numeric fields may be JSON strings or numbers.
pub fn parse_feed_message(text: &str) -> Result<FeedEvent> {
    let root: Value = serde_json::from_str(text).context("failed to parse feed JSON")?;

    let (stream, data) = match root.get("data") {
        Some(data) => (root["stream"].as_str(), data),
        None => (None, &root),
    };

    let kind = data["e"]
        .as_str()
        .or_else(|| stream.and_then(|s| s.rsplit('@').next()))
        .or_else(|| data.get("b").map(|_| BOOK_TICKER))
        .context("cannot determine feed event type")?;

    let symbol = data["s"]
        .as_str()
        .context("missing field s")?
        .to_uppercase();

    match kind {
        BOOK_TICKER => Ok(FeedEvent::Quote {
            symbol,
            bid: parse_string_f64(&data["b"], "b")?,
            ask: parse_string_f64(&data["a"], "a")?,
        }),
        AGG_TRADE => Ok(FeedEvent::Trade(Tick {
            symbol,
            time_ms: parse_i64(&data["T"], "T")?,
            price: parse_string_f64(&data["p"], "p")?,
            quantity: parse_string_f64(&data["q"], "q")?,
            buyer_is_maker: data["m"].as_bool(),
        })),
        other => bail!("unsupported feed event type {other}"),
    }
}

/// Parse a JSON value that may be a string-encoded or native number.
fn parse_string_f64(val: &Value, name: &str) -> Result<f64> {
    match val {
        Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        Value::Null => bail!("missing field {name}"),
        _ => bail!("field {name} has unexpected JSON type"),
    }
}

fn parse_i64(val: &Value, name: &str) -> Result<i64> {
    match val {
        Value::String(s) => s
            .parse::<i64>()
            .with_context(|| format!("failed to parse {name} as i64: {s}")),
        Value::Number(n) => n
            .as_i64()
            .with_context(|| format!("field {name} is not a valid i64")),
        Value::Null => bail!("missing field {name}"),
        _ => bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// WebSocket streams
// ---------------------------------------------------------------------------

/// Stream best bid/ask for every configured symbol into `state`.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller (main.rs) can handle reconnection.
pub async fn run_book_ticker_stream(state: &Arc<AppState>) -> Result<()> {
    run_combined_stream(state, BOOK_TICKER).await
}

/// Stream aggregated trades for every configured symbol into `state`.
pub async fn run_trade_stream(state: &Arc<AppState>) -> Result<()> {
    run_combined_stream(state, AGG_TRADE).await
}

async fn run_combined_stream(state: &Arc<AppState>, channel: &str) -> Result<()> {
    let url = build_stream_url(state.ws_base_url(), state.symbols(), channel);
    info!(url = %url, channel, "connecting to market WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .with_context(|| format!("failed to connect to {channel} WebSocket"))?;

    info!(channel, symbols = state.symbols().len(), "market WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match parse_feed_message(&text) {
                Ok(event) => state.apply(event),
                Err(e) => {
                    state.stats.record_malformed();
                    warn!(channel, error = %e, "dropping malformed feed message");
                }
            },
            Some(Ok(Message::Close(frame))) => {
                warn!(channel, ?frame, "market WebSocket closed by server");
                return Ok(());
            }
            // Pings are answered by tungstenite.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(channel, error = %e, "market WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(channel, "market WebSocket stream ended");
                return Ok(());
            }
        }
    }
}
