use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::BackendNotifier;
use crate::models::{AccessRequest, RequestStatus};

// ── Decision Event ────────────────────────────────────────────

/// Final-decision payload delivered to the backend callback URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionEvent {
    /// "request.approved", "request.declined" or "request.expired".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event was emitted.
    pub timestamp: String,
    pub request_id: String,
    pub status: RequestStatus,
    pub responder_name: Option<String>,
    pub responder_handle: Option<String>,
    pub responded_at: Option<String>,
}

impl DecisionEvent {
    pub fn from_request(r: &AccessRequest) -> Self {
        Self {
            event_type: format!("request.{}", r.status),
            timestamp: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            request_id: r.id.clone(),
            status: r.status,
            responder_name: r.responder_name.clone(),
            responder_handle: r.responder_handle.clone(),
            responded_at: r
                .responded_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid HMAC key: {}", e))?;
    mac.update(payload);
    let bytes = mac.finalize().into_bytes();
    Ok(format!("sha256={}", hex::encode(bytes)))
}

// ── Backend Webhook ───────────────────────────────────────────

/// Delivers decision events to the backend callback URL.
/// Supports:
/// - HMAC-SHA256 signing (X-Relay-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookBackend {
    client: reqwest::Client,
    url: Option<String>,
    signing_secret: Option<String>,
    backoff: Vec<Duration>,
    in_flight: Arc<Mutex<JoinSet<()>>>,
}

impl WebhookBackend {
    pub fn new(url: Option<String>, signing_secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("ApprovalRelay-Webhook/1.0")
            .build()
            .context("failed to build webhook HTTP client")?;

        Ok(Self {
            client,
            url,
            signing_secret,
            backoff: [0, 1, 5, 25].into_iter().map(Duration::from_secs).collect(),
            in_flight: Arc::new(Mutex::new(JoinSet::new())),
        })
    }

    /// Override the delay before each attempt (first entry is the initial attempt).
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Send one event to `url`, retrying per the back-off schedule.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn deliver(&self, url: &str, event: &DecisionEvent) -> Result<()> {
        let payload = serde_json::to_vec(event).context("webhook serialize error")?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload))
            .transpose()?;

        for (attempt, &delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    request_id = %event.request_id,
                    "retrying backend delivery"
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-relay-delivery-id", &delivery_id)
                .header("x-relay-timestamp", &timestamp)
                .header("x-relay-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-relay-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        request_id = %event.request_id,
                        delivery_id = %delivery_id,
                        attempt,
                        "backend event delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        request_id = %event.request_id,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "backend delivery failed (non-2xx)"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        request_id = %event.request_id,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "backend request error"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "backend delivery failed after {} attempts: {}",
            self.backoff.len(),
            url
        ))
    }
}

#[async_trait]
impl BackendNotifier for WebhookBackend {
    /// Fire-and-forget: delivery (with retries) runs on its own task, tracked
    /// so that [`BackendNotifier::flush`] can wait for it.
    async fn notify(&self, event: DecisionEvent) -> Result<()> {
        let Some(url) = self.url.clone() else {
            debug!(request_id = %event.request_id, "no backend callback URL configured, dropping event");
            return Ok(());
        };

        let backend = self.clone();
        let delivery = async move {
            if let Err(e) = backend.deliver(&url, &event).await {
                warn!(
                    url,
                    request_id = %event.request_id,
                    error = %e,
                    "backend delivery ultimately failed"
                );
            }
        };

        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| anyhow::anyhow!("backend delivery set poisoned"))?;
        // finished deliveries are reaped here so a long-running server does not accumulate them
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(delivery);
        Ok(())
    }

    async fn flush(&self) {
        let mut pending = match self.in_flight.lock() {
            Ok(mut set) => std::mem::take(&mut *set),
            Err(_) => return,
        };
        if !pending.is_empty() {
            debug!(deliveries = pending.len(), "waiting for backend deliveries");
        }
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "backend delivery task aborted");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
