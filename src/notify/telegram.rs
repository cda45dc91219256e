//! Telegram Bot API notifier.
//!
//! Each message is posted from a spawned task so the step function never
//! waits on the network. Outside a Tokio runtime the message is dropped.

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::Notifier;

const API_BASE: &str = "https://api.telegram.org";

/// Telegram caps message text at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

pub struct TelegramNotifier {
    http: Client,
    token: String,
    chat_id: String,
    prefix: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String, prefix: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            http,
            token,
            chat_id,
            prefix: prefix.to_string(),
        })
    }

    fn format(&self, text: &str) -> String {
        let full = format!("[{}] {}", self.prefix, text);
        if full.chars().count() <= MAX_MESSAGE_CHARS {
            full
        } else {
            let mut cut: String = full.chars().take(MAX_MESSAGE_CHARS - 1).collect();
            cut.push('…');
            cut
        }
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, text: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; notification dropped");
            return;
        };

        let http = self.http.clone();
        let url = format!("{API_BASE}/bot{}/sendMessage", self.token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": self.format(text),
            "disable_web_page_preview": true,
        });

        handle.spawn(async move {
            match http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => debug!("Notification delivered"),
                Ok(resp) => warn!(status = %resp.status(), "Notification rejected"),
                Err(e) => warn!(error = %e, "Notification failed"),
            }
        });
    }
}
