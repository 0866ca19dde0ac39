//! Shared fakes for the integration tests: a recording chat channel, a
//! recording backend, and a store wrapper that can be told to fail.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};

use approval_relay::lifecycle::{LifecycleConfig, LifecycleManager};
use approval_relay::models::{AccessRequest, NewAccessRequest, Settlement};
use approval_relay::notification::{
    BackendNotifier, DecisionEvent, InteractiveAction, NotificationChannel,
};
use approval_relay::store::memory::MemoryStore;
use approval_relay::store::RequestStore;

pub const CHAT: &str = "-100";

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat_target: String,
    pub body: String,
    pub actions: Vec<InteractiveAction>,
    pub message_ref: String,
}

#[derive(Debug, Clone)]
pub struct EditedMessage {
    pub chat_target: String,
    pub message_ref: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<SentMessage>>,
    pub edits: Mutex<Vec<EditedMessage>>,
    pub acks: Mutex<Vec<(String, String)>>,
    pub fail_send: AtomicBool,
    pub fail_edit: AtomicBool,
    next_ref: AtomicU64,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<EditedMessage> {
        self.edits.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<(String, String)> {
        self.acks.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(
        &self,
        chat_target: &str,
        body: &str,
        actions: &[InteractiveAction],
    ) -> anyhow::Result<String> {
        if self.fail_send.load(Ordering::SeqCst) {
            anyhow::bail!("channel unavailable");
        }
        let message_ref = (self.next_ref.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        self.sent.lock().unwrap().push(SentMessage {
            chat_target: chat_target.to_string(),
            body: body.to_string(),
            actions: actions.to_vec(),
            message_ref: message_ref.clone(),
        });
        Ok(message_ref)
    }

    async fn edit(&self, chat_target: &str, message_ref: &str, body: &str) -> anyhow::Result<()> {
        if self.fail_edit.load(Ordering::SeqCst) {
            anyhow::bail!("message can't be edited");
        }
        self.edits.lock().unwrap().push(EditedMessage {
            chat_target: chat_target.to_string(),
            message_ref: message_ref.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn acknowledge(&self, interaction_id: &str, text: &str) -> anyhow::Result<()> {
        self.acks
            .lock()
            .unwrap()
            .push((interaction_id.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBackend {
    pub events: Mutex<Vec<DecisionEvent>>,
    pub fail: AtomicBool,
    pub flushes: AtomicUsize,
}

impl RecordingBackend {
    pub fn events(&self) -> Vec<DecisionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendNotifier for RecordingBackend {
    async fn notify(&self, event: DecisionEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("backend returned 503");
        }
        Ok(())
    }

    async fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

/// MemoryStore wrapper whose conditional update fails for selected ids.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_settle_for: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn fail_settle(&self, id: &str) {
        self.fail_settle_for.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl RequestStore for FlakyStore {
    async fn insert(&self, request: &AccessRequest) -> anyhow::Result<bool> {
        self.inner.insert(request).await
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<AccessRequest>> {
        self.inner.get(id).await
    }

    async fn attach_message_ref(&self, id: &str, message_ref: &str) -> anyhow::Result<()> {
        self.inner.attach_message_ref(id, message_ref).await
    }

    async fn settle_if_pending(
        &self,
        id: &str,
        settlement: &Settlement,
    ) -> anyhow::Result<Option<AccessRequest>> {
        if self.fail_settle_for.lock().unwrap().contains(id) {
            anyhow::bail!("connection reset while updating '{}'", id);
        }
        self.inner.settle_if_pending(id, settlement).await
    }

    async fn list_overdue_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<AccessRequest>> {
        self.inner.list_overdue_pending(now, limit).await
    }
}

pub struct Harness {
    pub manager: LifecycleManager,
    pub store: Arc<FlakyStore>,
    pub channel: Arc<RecordingChannel>,
    pub backend: Arc<RecordingBackend>,
}

/// Current time at the precision the manager commits with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn lifecycle_config() -> LifecycleConfig {
    LifecycleConfig {
        expiry_window: Duration::minutes(15),
        chat_target: CHAT.to_string(),
        sweep_batch_size: 500,
        sweep_concurrency: 8,
    }
}

pub fn harness() -> Harness {
    let store = Arc::new(FlakyStore::default());
    let channel = Arc::new(RecordingChannel::default());
    let backend = Arc::new(RecordingBackend::default());
    let manager = LifecycleManager::new(
        store.clone(),
        channel.clone(),
        backend.clone(),
        lifecycle_config(),
    )
    .unwrap();

    Harness {
        manager,
        store,
        channel,
        backend,
    }
}

pub fn new_request(id: &str) -> NewAccessRequest {
    NewAccessRequest {
        id: Some(id.to_string()),
        requestor_name: Some("Jane Doe".to_string()),
        login_name: Some("jdoe".to_string()),
        system_name: Some("prod-db".to_string()),
        access_type: Some("admin".to_string()),
        reason: Some("incident".to_string()),
        requested_at: None,
    }
}
