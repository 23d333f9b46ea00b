use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::Notifier;
use crate::config::TelegramSettings;
use crate::Result;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
}

/// Telegram Bot API notifier, fanning each message out to every chat id
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
    chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, bot_token: &str, chat_ids: Vec<i64>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), bot_token),
            chat_ids,
        })
    }

    /// `None` when no bot token is configured
    pub fn from_settings(settings: &TelegramSettings) -> Result<Option<Self>> {
        match &settings.bot_token {
            Some(token) if !token.is_empty() => Ok(Some(Self::new(
                &settings.api_url,
                token,
                settings.chat_ids.clone(),
            )?)),
            _ => Ok(None),
        }
    }

    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()> {
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: "Markdown",
        };

        self.client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) {
        for &chat_id in &self.chat_ids {
            match self.send_to(chat_id, message).await {
                Ok(()) => tracing::debug!("Telegram message delivered to {}", chat_id),
                Err(e) => tracing::error!("Telegram delivery to {} failed: {}", chat_id, e),
            }
        }
    }
}
