//! Telegram webhook endpoint. Only `callback_query` updates (button presses)
//! are acted on; everything else is answered 200 and dropped.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::lifecycle::DecisionCommand;
use crate::models::ResponderIdentity;
use crate::AppState;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl From<TelegramUser> for ResponderIdentity {
    fn from(u: TelegramUser) -> Self {
        Self {
            first_name: u.first_name,
            last_name: u.last_name,
            username: u.username,
        }
    }
}

/// Split `action:request_id` on the first colon. Request ids may contain colons.
pub fn parse_callback_data(data: &str) -> Option<(&str, &str)> {
    let (action, request_id) = data.split_once(':')?;
    if action.is_empty() || request_id.is_empty() {
        return None;
    }
    Some((action, request_id))
}

fn secret_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(SECRET_HEADER)
        .map(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false)
}

/// POST /telegram-webhook
///
/// The secret token is checked before the body is parsed. Answers 200 for
/// every application-level outcome so Telegram does not redeliver; only
/// store failures answer 500, where a redelivery is safe because decisions
/// are idempotent.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(expected) = state.config.telegram_webhook_secret.as_deref() {
        if !secret_matches(&headers, expected) {
            tracing::warn!("telegram webhook: secret token mismatch");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(error = %e, "telegram webhook: unreadable update");
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some(query) = update.callback_query else {
        tracing::debug!(update_id = update.update_id, "ignoring non-callback update");
        return StatusCode::OK;
    };

    let data = query.data.clone().unwrap_or_default();
    let Some((action, request_id)) = parse_callback_data(&data) else {
        tracing::warn!(update_id = update.update_id, data = %data, "malformed callback data");
        state.lifecycle.acknowledge(&query.id, "Invalid action.").await;
        return StatusCode::OK;
    };

    tracing::info!(
        update_id = update.update_id,
        request_id,
        action,
        from = query.from.id,
        "decision callback received"
    );

    let cmd = DecisionCommand {
        request_id: request_id.to_string(),
        action: action.to_string(),
        interaction_id: Some(query.id),
        responder: query.from.into(),
    };

    match state.lifecycle.apply_decision(cmd, Utc::now()).await {
        Ok(outcome) => {
            tracing::debug!(request_id, outcome = outcome.label(), "decision callback handled");
            StatusCode::OK
        }
        Err(AppError::Validation(reason)) => {
            tracing::warn!(request_id, %reason, "rejected decision callback");
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!(request_id, error = %e, "decision callback failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_data() {
        assert_eq!(parse_callback_data("approve:r1"), Some(("approve", "r1")));
        assert_eq!(
            parse_callback_data("decline:urn:req:7"),
            Some(("decline", "urn:req:7"))
        );
        assert_eq!(parse_callback_data("approve"), None);
        assert_eq!(parse_callback_data(":r1"), None);
        assert_eq!(parse_callback_data("approve:"), None);
    }

    #[test]
    fn test_secret_matches() {
        let mut headers = HeaderMap::new();
        assert!(!secret_matches(&headers, "s3cret"));
        headers.insert(SECRET_HEADER, "wrong".parse().unwrap());
        assert!(!secret_matches(&headers, "s3cret"));
        headers.insert(SECRET_HEADER, "s3cret".parse().unwrap());
        assert!(secret_matches(&headers, "s3cret"));
    }

    #[test]
    fn test_update_deserializes_callback_query() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 10,
            "callback_query": {
                "id": "cbq-1",
                "from": { "id": 5, "is_bot": false, "first_name": "Alice", "username": "alice" },
                "message": { "message_id": 77, "chat": { "id": -100 } },
                "chat_instance": "x",
                "data": "approve:r1"
            }
        }))
        .unwrap();

        let query = update.callback_query.unwrap();
        assert_eq!(query.data.as_deref(), Some("approve:r1"));
        let who: ResponderIdentity = query.from.into();
        assert_eq!(who.display_name(), "Alice");
    }
}
