// =============================================================================
// Pulse — Main Entry Point
// =============================================================================
//
// Loads configuration, builds one runtime per symbol, then runs the quote and
// trade streams, the optional heartbeat and the alert sink until Ctrl-C.
// Streams reconnect on their own; instrument state is never reset.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pulse_alerts::app_state::AppState;
use pulse_alerts::market_data::feed;
use pulse_alerts::notify::{self, TelegramNotifier};
use pulse_alerts::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "pulse_config.json";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Pulse Alert Engine — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path = std::env::var("PULSE_CONFIG").unwrap_or_else(|_| CONFIG_PATH.to_string());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();
    config.validate().context("invalid configuration")?;

    info!(symbols = ?config.symbols, "Configured instruments");
    info!(
        trigger = config.instrument.timeframes.trigger_width_sec,
        context = config.instrument.timeframes.context_width_sec,
        bias = config.instrument.timeframes.bias_width_sec,
        cooldown = config.instrument.gate.cooldown_window_sec,
        "Default timeframes (seconds)"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let (alert_tx, alert_rx) = mpsc::channel(config.alert_channel_capacity);
    let state = Arc::new(AppState::new(&config, alert_tx));

    // ── 3. Alert sink ────────────────────────────────────────────────────
    let notifier = TelegramNotifier::from_env(&config.telegram)?;
    if let Some(n) = &notifier {
        let hello = format!("✅ Pulse started | symbols={}", state.symbols().len());
        if let Err(e) = n.send(&hello).await {
            warn!(error = %e, "Telegram startup message failed");
        }
    }
    tokio::spawn(notify::run_alert_sink(alert_rx, notifier));

    // ── 4. Spawn market data streams ─────────────────────────────────────
    {
        let st = state.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = feed::run_book_ticker_stream(&st).await {
                    error!(error = %e, "bookTicker stream error — reconnecting in 5s");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });
    }
    {
        let st = state.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = feed::run_trade_stream(&st).await {
                    error!(error = %e, "aggTrade stream error — reconnecting in 5s");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });
    }

    // ── 5. Heartbeat ─────────────────────────────────────────────────────
    if config.heartbeat_sec > 0 {
        let st = state.clone();
        let period = Duration::from_secs(config.heartbeat_sec);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                st.heartbeat_all(Utc::now().timestamp());
            }
        });
        info!(every_sec = config.heartbeat_sec, "Heartbeat enabled");
    }

    // ── 6. Periodic status ───────────────────────────────────────────────
    {
        let st = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATUS_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = st.stats.snapshot();
                let warm = st
                    .build_snapshot(Utc::now().timestamp())
                    .iter()
                    .filter(|s| s.last_snapshot.is_some())
                    .count();
                info!(
                    uptime_s = st.start_time.elapsed().as_secs(),
                    quotes = stats.quotes,
                    trades = stats.trades,
                    evaluations = stats.evaluations,
                    alerts = stats.alerts_sent,
                    dropped = stats.alerts_dropped,
                    malformed = stats.malformed,
                    evaluating = warm,
                    "status"
                );
            }
        });
    }

    info!("All subsystems started. Press Ctrl+C to stop.");

    // ── 7. Wait for shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("Shutdown signal received. Exiting.");
    Ok(())
}
