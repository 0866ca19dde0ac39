//! Outbound collaborators: the reviewer-facing chat channel and the backend
//! that receives final decisions. Both are treated as unreliable; callers
//! log their failures and never roll back the store because of them.

pub mod telegram;
pub mod templates;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::webhook::DecisionEvent;

/// An interactive button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveAction {
    pub label: String,
    pub callback_data: String,
}

/// Chat channel used to reach the reviewer.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Send an interactive message. Returns the opaque message reference used by `edit`.
    async fn send(
        &self,
        chat_target: &str,
        body: &str,
        actions: &[InteractiveAction],
    ) -> anyhow::Result<String>;

    /// Replace the body of a previously sent message, dropping its buttons.
    async fn edit(&self, chat_target: &str, message_ref: &str, body: &str) -> anyhow::Result<()>;

    /// Answer an interactive callback so the reviewer's client stops spinning.
    async fn acknowledge(&self, interaction_id: &str, text: &str) -> anyhow::Result<()>;
}

/// Receiver of final-decision events.
#[async_trait]
pub trait BackendNotifier: Send + Sync {
    /// Hand off an event for delivery. Must not block the caller on the remote endpoint.
    async fn notify(&self, event: DecisionEvent) -> anyhow::Result<()>;

    /// Wait for every handed-off delivery to finish, retries included.
    /// One-shot commands call this before the runtime shuts down.
    async fn flush(&self) {}
}
