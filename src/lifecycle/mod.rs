//! Request lifecycle manager.
//!
//! Owns the `pending → {approved, declined, expired}` state machine. Every
//! transition is committed through [`RequestStore::settle_if_pending`], a
//! per-record compare-and-set; there is no in-process lock. Whoever wins the
//! conditional update performs the follow-up (message edit, backend event),
//! and those follow-ups never roll the store back.

mod sweep;

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::metrics::RelayMetrics;
use crate::models::{
    AccessRequest, DecisionAction, NewAccessRequest, RequestStatus, ResponderIdentity, Settlement,
    StatusView,
};
use crate::notification::{templates, BackendNotifier, DecisionEvent, NotificationChannel};
use crate::store::RequestStore;

const ACK_NOT_FOUND: &str = "Request not found.";
const ACK_SETTLED: &str = "⏳ Request expired or already responded.";
const ACK_INVALID: &str = "Invalid action.";
const ACK_FAILED: &str = "Something went wrong, please retry.";

/// Timestamps are kept at microsecond precision, the resolution of a
/// PostgreSQL `TIMESTAMPTZ`, so every store returns exactly what was committed.
pub(crate) fn store_precision(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(6)
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Fixed window between `requested_at` and `expires_at`.
    pub expiry_window: chrono::Duration,
    /// Chat the reviewer messages are sent to and edited in.
    pub chat_target: String,
    /// Upper bound on records handled by one sweep pass.
    pub sweep_batch_size: i64,
    /// Records expired in parallel within one sweep pass.
    pub sweep_concurrency: usize,
}

impl LifecycleConfig {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            expiry_window: cfg.expiry_window,
            chat_target: cfg.chat_id()?.to_string(),
            sweep_batch_size: cfg.sweep_batch_size,
            sweep_concurrency: 8,
        })
    }
}

/// A reviewer decision as delivered by the channel (or an operator).
#[derive(Debug, Clone)]
pub struct DecisionCommand {
    pub request_id: String,
    /// Unparsed action, e.g. "approve" or "declined".
    pub action: String,
    pub responder: ResponderIdentity,
    /// Callback to acknowledge; `None` for decisions that did not come from a button.
    pub interaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// This call committed the decision.
    Applied(AccessRequest),
    /// The request had already left `pending`, or its window had passed.
    AlreadySettled(RequestStatus),
    NotFound,
}

impl DecisionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DecisionOutcome::Applied(_) => "applied",
            DecisionOutcome::AlreadySettled(_) => "already_settled",
            DecisionOutcome::NotFound => "not_found",
        }
    }

    fn ack_text(&self) -> String {
        match self {
            DecisionOutcome::Applied(r) => format!("You {}", r.status),
            DecisionOutcome::AlreadySettled(_) => ACK_SETTLED.to_string(),
            DecisionOutcome::NotFound => ACK_NOT_FOUND.to_string(),
        }
    }
}

/// Result of resolving a decision: the outcome to report, plus the record
/// this call transitioned (if any), whose follow-ups this call now owns.
struct Resolution {
    outcome: DecisionOutcome,
    committed: Option<AccessRequest>,
}

impl Resolution {
    fn settled(status: RequestStatus) -> Self {
        Self {
            outcome: DecisionOutcome::AlreadySettled(status),
            committed: None,
        }
    }
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn RequestStore>,
    channel: Arc<dyn NotificationChannel>,
    backend: Arc<dyn BackendNotifier>,
    metrics: Arc<RelayMetrics>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn RequestStore>,
        channel: Arc<dyn NotificationChannel>,
        backend: Arc<dyn BackendNotifier>,
        config: LifecycleConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            channel,
            backend,
            metrics: Arc::new(RelayMetrics::new()?),
            config,
        })
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Persist a new pending request, then notify the reviewer.
    ///
    /// A failed notification leaves the request persisted as `pending` (it
    /// still expires normally) and is reported as [`AppError::Notification`].
    pub async fn create(
        &self,
        mut fields: NewAccessRequest,
        now: DateTime<Utc>,
    ) -> Result<AccessRequest, AppError> {
        fields.requested_at = fields.requested_at.map(store_precision);
        let mut request = fields.into_pending(store_precision(now), self.config.expiry_window)?;

        let inserted = self
            .store
            .insert(&request)
            .await
            .map_err(AppError::from_store)?;
        if !inserted {
            warn!(request_id = %request.id, "duplicate request id rejected");
            return Err(AppError::Duplicate(request.id));
        }
        self.metrics.request_created();
        info!(
            request_id = %request.id,
            system = %request.system_name,
            expires_at = %request.expires_at,
            "access request created"
        );

        let body = templates::request_body(&request);
        let actions = templates::decision_actions(&request.id);
        let message_ref = match self
            .channel
            .send(&self.config.chat_target, &body, &actions)
            .await
        {
            Ok(message_ref) => message_ref,
            Err(e) => {
                self.metrics.side_effect_failure("send");
                return Err(AppError::Notification {
                    request_id: request.id,
                    source: e,
                });
            }
        };

        self.store
            .attach_message_ref(&request.id, &message_ref)
            .await
            .map_err(AppError::from_store)?;
        request.notification_message_ref = Some(message_ref);

        Ok(request)
    }

    /// Apply a reviewer decision exactly once.
    ///
    /// Duplicate deliveries, decisions on settled requests and decisions
    /// racing the sweep all resolve to [`DecisionOutcome::AlreadySettled`]
    /// without touching the store. The interaction is always acknowledged.
    pub async fn apply_decision(
        &self,
        cmd: DecisionCommand,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, AppError> {
        let resolved = self.resolve(&cmd, store_precision(now)).await;

        let ack = match &resolved {
            Ok(r) => r.outcome.ack_text(),
            Err(AppError::Validation(_)) => ACK_INVALID.to_string(),
            Err(_) => ACK_FAILED.to_string(),
        };
        if let Some(interaction_id) = &cmd.interaction_id {
            self.acknowledge(interaction_id, &ack).await;
        }

        let resolution = match resolved {
            Ok(r) => r,
            Err(e) => {
                self.metrics.decision(match e {
                    AppError::Validation(_) => "invalid",
                    _ => "error",
                });
                return Err(e);
            }
        };

        self.metrics.decision(resolution.outcome.label());
        if let Some(record) = &resolution.committed {
            self.publish_settlement(record).await;
        }
        Ok(resolution.outcome)
    }

    pub async fn get_status(&self, id: &str) -> Result<StatusView, AppError> {
        let record = self
            .store
            .get(id)
            .await
            .map_err(AppError::from_store)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        Ok(StatusView::from(&record))
    }

    /// Wait for backend deliveries handed off by earlier transitions.
    pub async fn flush(&self) {
        self.backend.flush().await;
    }

    /// Answer an interactive callback. Failures are logged only.
    pub async fn acknowledge(&self, interaction_id: &str, text: &str) {
        if let Err(e) = self.channel.acknowledge(interaction_id, text).await {
            self.metrics.side_effect_failure("acknowledge");
            warn!(interaction_id, error = %e, "failed to acknowledge interaction");
        }
    }

    async fn resolve(
        &self,
        cmd: &DecisionCommand,
        now: DateTime<Utc>,
    ) -> Result<Resolution, AppError> {
        let action = DecisionAction::parse(&cmd.action).ok_or_else(|| {
            AppError::Validation(format!("unknown decision action '{}'", cmd.action))
        })?;
        let id = cmd.request_id.as_str();

        let Some(current) = self.store.get(id).await.map_err(AppError::from_store)? else {
            debug!(request_id = %id, "decision for unknown request");
            return Ok(Resolution {
                outcome: DecisionOutcome::NotFound,
                committed: None,
            });
        };

        if current.status.is_terminal() {
            debug!(request_id = %id, status = %current.status, "decision on settled request ignored");
            return Ok(Resolution::settled(current.status));
        }
        if current.is_expired_at(now) {
            return self.expire_on_late_decision(id, now).await;
        }

        let settlement = Settlement::decision(action, &cmd.responder, now);
        match self
            .store
            .settle_if_pending(id, &settlement)
            .await
            .map_err(AppError::from_store)?
        {
            Some(record) => {
                info!(
                    request_id = %id,
                    status = %record.status,
                    responder = %settlement.responder_name,
                    "decision applied"
                );
                Ok(Resolution {
                    outcome: DecisionOutcome::Applied(record.clone()),
                    committed: Some(record),
                })
            }
            None => {
                // Lost the race to another writer, or crossed the expiry
                // instant between the read and the conditional update.
                let latest = self.store.get(id).await.map_err(AppError::from_store)?;
                match latest {
                    Some(r) if r.status == RequestStatus::Pending => {
                        self.expire_on_late_decision(id, now).await
                    }
                    Some(r) => {
                        debug!(request_id = %id, status = %r.status, "decision lost conditional update");
                        Ok(Resolution::settled(r.status))
                    }
                    None => Ok(Resolution {
                        outcome: DecisionOutcome::NotFound,
                        committed: None,
                    }),
                }
            }
        }
    }

    /// The late decision is discarded; the request is expired instead.
    async fn expire_on_late_decision(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Resolution, AppError> {
        let expired = self
            .store
            .settle_if_pending(id, &Settlement::expiry(now))
            .await
            .map_err(AppError::from_store)?;

        match expired {
            Some(record) => {
                self.metrics.expired("late_decision");
                info!(request_id = %id, "late decision discarded, request expired");
                Ok(Resolution {
                    outcome: DecisionOutcome::AlreadySettled(RequestStatus::Expired),
                    committed: Some(record),
                })
            }
            None => {
                let status = self
                    .store
                    .get(id)
                    .await
                    .map_err(AppError::from_store)?
                    .map(|r| r.status)
                    .unwrap_or(RequestStatus::Expired);
                Ok(Resolution::settled(status))
            }
        }
    }

    /// Post-commit follow-up for a transition this caller won: edit the
    /// reviewer message (when one was sent) and emit one backend event.
    async fn publish_settlement(&self, record: &AccessRequest) {
        match &record.notification_message_ref {
            Some(message_ref) => {
                let body = templates::settled_body(record);
                if let Err(e) = self
                    .channel
                    .edit(&self.config.chat_target, message_ref, &body)
                    .await
                {
                    let err = AppError::Notification {
                        request_id: record.id.clone(),
                        source: e,
                    };
                    self.metrics.side_effect_failure(err.kind());
                    warn!(request_id = %record.id, error = %err, "failed to edit reviewer message");
                }
            }
            None => debug!(request_id = %record.id, "no reviewer message to edit"),
        }

        if let Err(e) = self.backend.notify(DecisionEvent::from_request(record)).await {
            let err = AppError::Backend {
                request_id: record.id.clone(),
                source: e,
            };
            self.metrics.side_effect_failure(err.kind());
            warn!(request_id = %record.id, error = %err, "failed to hand off backend event");
        }
    }
}
