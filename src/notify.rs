//! Best-effort trade notifications.
//!
//! `notify` returns immediately: delivery runs on its own task with a
//! timeout, and failures are logged and dropped.

use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AlertsConfig;

pub trait Notifier: Send + Sync {
    fn notify(&self, account_id: &str, title: &str, body: &str);
}

/// Used when no alert channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, account_id: &str, title: &str, _body: &str) {
        debug!(account_id, title, "Notification dropped (no channel configured)");
    }
}

const TELEGRAM_API: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TelegramNotifier {
    http: Client,
    token: Arc<SecretString>,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: SecretString, chat_id: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(SEND_TIMEOUT)
            .user_agent("TIDEWATCH/0.1.0 (trading-agent)")
            .build()
            .context("Failed to build HTTP client for Telegram")?;
        Ok(Self {
            http,
            token: Arc::new(token),
            chat_id,
        })
    }

    /// Build from the env vars named in `[alerts]`. `None` when either is
    /// unset.
    pub fn from_config(config: &AlertsConfig) -> Result<Option<Self>> {
        let lookup = |name: &Option<String>| name.as_deref().and_then(|n| std::env::var(n).ok());
        match (lookup(&config.telegram_bot_token_env), lookup(&config.telegram_chat_id_env)) {
            (Some(token), Some(chat_id)) => Ok(Some(Self::new(SecretString::new(token), chat_id)?)),
            _ => Ok(None),
        }
    }
}

pub fn format_message(account_id: &str, title: &str, body: &str) -> String {
    format!("[{account_id}] {title}\n{body}")
}

impl Notifier for TelegramNotifier {
    fn notify(&self, account_id: &str, title: &str, body: &str) {
        let http = self.http.clone();
        let token = Arc::clone(&self.token);
        let chat_id = self.chat_id.clone();
        let text = format_message(account_id, title, body);
        let account_id = account_id.to_string();

        tokio::spawn(async move {
            let url = format!("{TELEGRAM_API}/bot{}/sendMessage", token.expose_secret());
            let send = http
                .post(&url)
                .json(&serde_json::json!({"chat_id": chat_id, "text": text}))
                .send();
            match tokio::time::timeout(SEND_TIMEOUT, send).await {
                Ok(Ok(resp)) if resp.status().is_success() => {}
                Ok(Ok(resp)) => warn!(account_id = %account_id, status = %resp.status(), "Telegram rejected notification"),
                Ok(Err(e)) => warn!(account_id = %account_id, error = %e.without_url(), "Telegram notification failed"),
                Err(_) => warn!(account_id = %account_id, "Telegram notification timed out"),
            }
        });
    }
}
