use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::{InteractiveAction, NotificationChannel};

/// Telegram Bot API client used as the reviewer channel.
///
/// The bot token is part of every method URL, so request errors are stripped
/// of their URL before they are logged or returned.
#[derive(Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

impl TelegramChannel {
    pub fn new(api_base: &str, bot_token: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("ApprovalRelay/1.0")
            .build()
            .context("failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<T> {
        let resp = self
            .client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("telegram {} request failed", method))?;

        let status = resp.status();
        let body: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("telegram {} returned unreadable body (status={})", method, status))?;

        if !body.ok {
            anyhow::bail!(
                "telegram {} failed: status={}, description={}",
                method,
                status,
                body.description.unwrap_or_default()
            );
        }

        body.result
            .with_context(|| format!("telegram {} returned ok without a result", method))
    }

    /// Register `url` as the bot's webhook. Run once per deployment.
    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> anyhow::Result<bool> {
        let mut payload = json!({
            "url": url,
            "allowed_updates": ["callback_query"],
        });
        if let Some(secret) = secret_token {
            payload["secret_token"] = json!(secret);
        }

        let registered: bool = self.call("setWebhook", &payload).await?;
        tracing::info!(url, registered, "telegram webhook registered");
        Ok(registered)
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send(
        &self,
        chat_target: &str,
        body: &str,
        actions: &[InteractiveAction],
    ) -> anyhow::Result<String> {
        let row: Vec<InlineButton<'_>> = actions
            .iter()
            .map(|a| InlineButton {
                text: &a.label,
                callback_data: &a.callback_data,
            })
            .collect();

        let payload = json!({
            "chat_id": chat_target,
            "text": body,
            "parse_mode": "HTML",
            "reply_markup": { "inline_keyboard": [row] },
        });

        let sent: SentMessage = self.call("sendMessage", &payload).await?;
        tracing::debug!(message_id = sent.message_id, "telegram message sent");
        Ok(sent.message_id.to_string())
    }

    async fn edit(&self, chat_target: &str, message_ref: &str, body: &str) -> anyhow::Result<()> {
        let message_id: i64 = message_ref
            .parse()
            .with_context(|| format!("invalid telegram message ref '{}'", message_ref))?;

        let payload = json!({
            "chat_id": chat_target,
            "message_id": message_id,
            "text": body,
            "parse_mode": "HTML",
        });

        // Result is the edited Message, or `true` for inline messages
        let _: serde_json::Value = self.call("editMessageText", &payload).await?;
        Ok(())
    }

    async fn acknowledge(&self, interaction_id: &str, text: &str) -> anyhow::Result<()> {
        let payload = json!({
            "callback_query_id": interaction_id,
            "text": text,
        });
        let _: bool = self.call("answerCallbackQuery", &payload).await?;
        Ok(())
    }
}
