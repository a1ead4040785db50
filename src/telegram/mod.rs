use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::execution::intent::PositionIntent;
use crate::execution::ExecutionOutcome;
use crate::strategy::Signal;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The subscriber blocked the bot; the chat will never accept messages again
    #[error("chat blocked the bot")]
    Blocked,

    #[error("telegram api error: {0}")]
    Api(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Delivery channel for subscriber-facing messages (HTML formatted)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    api_url: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, api_url: String) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(10)).build()?,
            bot_token,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);

        let response: BotApiResponse = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML"
            }))
            .send()
            .await?
            .json()
            .await?;

        if response.ok {
            return Ok(());
        }

        let description = response.description.unwrap_or_default();
        if response.error_code == Some(403) && description.contains("blocked by the user") {
            return Err(NotifyError::Blocked);
        }
        Err(NotifyError::Api(description))
    }
}

/// Stand-in used when no bot token is configured; messages go to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        tracing::info!("📨 [{}] {}", chat_id, text.replace('\n', " | "));
        Ok(())
    }
}

pub fn signal_alert(signal: &Signal) -> String {
    let m = &signal.metrics;
    format!(
        "<b>${}</b>\n\
         🚨 <b>OI ALERT</b>\n\
         ⏱ Period: {}\n\n\
         OI 4h: {:.1}%\n\
         OI 24h: {:.1}%\n\n\
         Price 4h: {:.1}%\n\
         Price 24h: {:.1}%\n\n\
         Current price: {:.4}\n\
         OI: {:.1}M USDT\n\n\
         <i>OI is growing faster than price → possible accumulation</i>",
        signal.symbol.base(),
        signal.period,
        m.oi_growth_4h,
        m.oi_growth_24h,
        m.price_growth_4h,
        m.price_growth_24h,
        m.price_now,
        m.oi_now / 1e6,
    )
}

pub fn position_opened(intent: &PositionIntent, signal: &Signal, trailing: bool) -> String {
    let tps = intent
        .take_profit_prices
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" / ");
    format!(
        "✅ <b>Position opened</b> {}\n\n\
         ⏱ Period: {}\n\
         🎯 Entry: {}\n\
         🔢 Qty: {}\n\
         📈 Leverage: {}x\n\
         🛡️ Stop Loss: {}\n\
         🎯 Take Profits: {}\n\
         🪝 Trailing: {}",
        intent.symbol,
        signal.period,
        intent.entry_price,
        intent.quantity,
        intent.leverage,
        intent.stop_price,
        tps,
        if trailing { "on" } else { "off" },
    )
}

/// Makes venue text safe inside an HTML-mode message
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn degraded_protection(intent: &PositionIntent, detail: &str) -> String {
    format!(
        "⚠️ <b>Position opened, trailing stop not set</b> {}\n\n\
         Stop loss and take profits are in place.\n\
         Reason: {}",
        intent.symbol,
        escape_html(detail)
    )
}

pub fn closed_on_failure(intent: &PositionIntent, outcome: &ExecutionOutcome, detail: Option<&str>) -> String {
    let mut message = format!(
        "❌ <b>Position closed</b> {}\n\n\
         📋 Reason: {}",
        intent.symbol, outcome
    );
    if let Some(detail) = detail {
        message.push_str(&format!("\n⚠️ {}", escape_html(detail)));
    }
    message
}
