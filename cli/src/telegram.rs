use std::time::Duration;

use anyhow::{Context, Result, bail};
use aquakeeper_core::telegram::{
    ApiResponse, MAX_MESSAGE_LEN, SendMessage, SetWebhook, Update, split_message,
};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where bot replies go.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// Send replies in order, splitting any over the message limit. Delivery
/// failures are logged and dropped.
pub async fn deliver(outbound: &dyn Outbound, chat_id: i64, replies: &[String]) {
    for reply in replies {
        for chunk in split_message(reply, MAX_MESSAGE_LEN) {
            if let Err(e) = outbound.send_text(chat_id, &chunk).await {
                error!(chat_id, "failed to send reply: {e:#}");
            }
        }
    }
}

pub struct TelegramClient {
    client: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "aquakeeper/{} (aquarium bot)",
                env!("CARGO_PKG_VERSION")
            ))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base: format!("{API_BASE}/bot{token}"),
        })
    }

    async fn call<P, T>(&self, method: &str, params: &P, timeout: Duration) -> Result<T>
    where
        P: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        // The token is part of the URL, keep it out of error messages
        let resp = self
            .client
            .post(format!("{}/{method}", self.base))
            .timeout(timeout)
            .json(params)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Failed to reach Telegram ({method})"))?;

        let data: ApiResponse<T> = resp
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Failed to parse Telegram {method} response"))?;

        if !data.ok {
            bail!(
                "Telegram {method} failed: {}",
                data.description.unwrap_or_default()
            );
        }
        data.result
            .with_context(|| format!("Telegram {method} returned no result"))
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call("sendMessage", &SendMessage { chat_id, text }, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`, waiting up to `timeout_secs` server-side.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let params = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "edited_message"],
        });
        self.call(
            "getUpdates",
            &params,
            Duration::from_secs(timeout_secs) + REQUEST_TIMEOUT,
        )
        .await
    }

    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<()> {
        let params = SetWebhook {
            url,
            secret_token,
            allowed_updates: &["message", "edited_message"],
        };
        let _: bool = self.call("setWebhook", &params, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self
            .call("deleteWebhook", &serde_json::json!({}), REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Outbound for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::{Mutex, PoisonError};

    use super::*;

    /// Records every message instead of sending it.
    #[derive(Default)]
    pub struct RecordingOutbound {
        pub sent: Mutex<Vec<(i64, String)>>,
    }

    impl RecordingOutbound {
        pub fn sent(&self) -> Vec<(i64, String)> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((chat_id, text.to_string()));
            Ok(())
        }
    }
}
