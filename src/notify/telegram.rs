// =============================================================================
// Telegram Notifier — Bot API sendMessage with bounded retries
// =============================================================================
//
// SECURITY: the bot token is part of the request URL and is never logged.
// =============================================================================

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::decision_envelope::AlertEvent;
use crate::runtime_config::TelegramSettings;
use crate::types::Side;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Render an alert as a plain-text message.
pub fn format_alert(event: &AlertEvent) -> String {
    let marker = match event.side {
        Side::Long => "🟢",
        Side::Short => "🔴",
    };
    let mut text = format!(
        "{marker} {} {}\nPrice: {:.6}\nSpread: {:.4}%\nTime: {}",
        event.side,
        event.symbol,
        event.price,
        event.spread * 100.0,
        event.emitted_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if !event.reasons.is_empty() {
        text.push_str("\nReasons:");
        for reason in &event.reasons {
            let _ = write!(text, "\n- {reason}");
        }
    }
    text
}

/// Delay before retry number `attempt + 1`: 1.5 s, 3 s, 4.5 s, ...
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs_f64(1.5 * f64::from(attempt + 1))
}

#[derive(Clone)]
pub struct TelegramNotifier {
    chat_id: String,
    send_url: String,
    retries: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat_id", &self.chat_id)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    pub fn new(
        bot_token: &str,
        chat_id: impl Into<String>,
        settings: &TelegramSettings,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_sec.max(1)))
            .build()
            .context("failed to build Telegram HTTP client")?;

        Ok(Self {
            chat_id: chat_id.into(),
            send_url: format!("{TELEGRAM_API}/bot{bot_token}/sendMessage"),
            retries: settings.retries,
            client,
        })
    }

    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`.  Returns `None`
    /// when delivery is disabled or either variable is missing.
    pub fn from_env(settings: &TelegramSettings) -> Result<Option<Self>> {
        Self::from_lookup(settings, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        settings: &TelegramSettings,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>> {
        if !settings.enabled {
            return Ok(None);
        }
        let token = lookup("TELEGRAM_BOT_TOKEN").filter(|s| !s.trim().is_empty());
        let chat_id = lookup("TELEGRAM_CHAT_ID").filter(|s| !s.trim().is_empty());
        match (token, chat_id) {
            (Some(token), Some(chat_id)) => {
                Self::new(token.trim(), chat_id.trim(), settings).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// POST one message, retrying on transport errors and non-2xx replies.
    #[instrument(skip(self, text), name = "telegram::send")]
    pub async fn send(&self, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let mut attempt = 0;
        loop {
            let err = match self.client.post(&self.send_url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(attempt, "telegram message sent");
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    let snippet: String = body.chars().take(120).collect();
                    anyhow::anyhow!("Telegram sendMessage returned {status}: {snippet}")
                }
                Err(e) => anyhow::Error::new(e).context("Telegram sendMessage request failed"),
            };

            if attempt >= self.retries {
                bail!("{err:#} (after {} attempts)", attempt + 1);
            }
            warn!(attempt, error = %err, "telegram send failed, retrying");
            tokio::time::sleep(retry_delay(attempt)).await;
            attempt += 1;
        }
    }
}

/// Drain the alert channel until every sender is gone.  Every alert is
/// logged; it is also sent to Telegram when a notifier is configured.
pub async fn run_alert_sink(
    mut rx: mpsc::Receiver<AlertEvent>,
    notifier: Option<TelegramNotifier>,
) {
    if notifier.is_none() {
        info!("Telegram not configured, alerts will only be logged");
    }

    while let Some(event) = rx.recv().await {
        let text = format_alert(&event);
        info!(
            id = %event.id,
            symbol = %event.symbol,
            side = %event.side,
            price = event.price,
            "ALERT"
        );
        if let Some(n) = &notifier {
            if let Err(e) = n.send(&text).await {
                warn!(id = %event.id, error = %e, "failed to deliver alert");
            }
        }
    }

    info!("alert channel closed, sink stopping");
}
