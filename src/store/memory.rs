use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::RequestStore;
use crate::models::{AccessRequest, RequestStatus, Settlement};

/// In-process store. The DashMap shard lock taken by `get_mut` makes each
/// conditional update atomic per record; it is never held across an await.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, AccessRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert(&self, request: &AccessRequest) -> anyhow::Result<bool> {
        match self.records.entry(request.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(request.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<AccessRequest>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn attach_message_ref(&self, id: &str, message_ref: &str) -> anyhow::Result<()> {
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.notification_message_ref = Some(message_ref.to_string());
                Ok(())
            }
            None => anyhow::bail!("request '{}' disappeared before its message ref was stored", id),
        }
    }

    async fn settle_if_pending(
        &self,
        id: &str,
        settlement: &Settlement,
    ) -> anyhow::Result<Option<AccessRequest>> {
        let Some(mut record) = self.records.get_mut(id) else {
            return Ok(None);
        };

        if record.status != RequestStatus::Pending {
            return Ok(None);
        }
        if settlement.requires_unexpired() && record.is_expired_at(settlement.responded_at) {
            return Ok(None);
        }

        record.status = settlement.status;
        record.responder_name = Some(settlement.responder_name.clone());
        record.responder_handle = settlement.responder_handle.clone();
        record.responded_at = Some(settlement.responded_at);
        Ok(Some(record.clone()))
    }

    async fn list_overdue_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<AccessRequest>> {
        let mut overdue: Vec<AccessRequest> = self
            .records
            .iter()
            .filter(|r| r.status == RequestStatus::Pending && r.expires_at <= now)
            .map(|r| r.clone())
            .collect();
        overdue.sort_by_key(|r| r.expires_at);
        overdue.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(overdue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecisionAction, NewAccessRequest, ResponderIdentity};
    use chrono::Duration;

    fn pending(id: &str, requested_at: DateTime<Utc>) -> AccessRequest {
        NewAccessRequest {
            id: Some(id.to_string()),
            requestor_name: Some("Requestor".to_string()),
            system_name: Some("billing".to_string()),
            access_type: Some("admin".to_string()),
            reason: Some("deploy".to_string()),
            requested_at: Some(requested_at),
            ..Default::default()
        }
        .into_pending(requested_at, Duration::minutes(15))
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_without_overwriting() {
        let store = MemoryStore::new();
        let now = Utc::now();
        assert!(store.insert(&pending("r1", now)).await.unwrap());

        let mut other = pending("r1", now);
        other.reason = "overwrite attempt".to_string();
        assert!(!store.insert(&other).await.unwrap());

        let stored = store.get("r1").await.unwrap().unwrap();
        assert_eq!(stored.reason, "deploy");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_settle_only_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert(&pending("r1", now)).await.unwrap();

        let alice = ResponderIdentity::named("Alice");
        let first = Settlement::decision(DecisionAction::Approve, &alice, now);
        let settled = store.settle_if_pending("r1", &first).await.unwrap().unwrap();
        assert_eq!(settled.status, RequestStatus::Approved);
        assert_eq!(settled.responder_name.as_deref(), Some("Alice"));

        let second = Settlement::decision(
            DecisionAction::Decline,
            &ResponderIdentity::named("Mallory"),
            now + Duration::seconds(5),
        );
        assert!(store.settle_if_pending("r1", &second).await.unwrap().is_none());

        let stored = store.get("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Approved);
        assert_eq!(stored.responded_at, Some(now));
    }

    #[tokio::test]
    async fn test_decision_rejected_past_expiry_but_expiry_applies() {
        let store = MemoryStore::new();
        let requested_at = Utc::now() - Duration::minutes(20);
        store.insert(&pending("r1", requested_at)).await.unwrap();

        let now = Utc::now();
        let decision = Settlement::decision(DecisionAction::Approve, &ResponderIdentity::named("A"), now);
        assert!(store.settle_if_pending("r1", &decision).await.unwrap().is_none());

        let expired = store
            .settle_if_pending("r1", &Settlement::expiry(now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(expired.status, RequestStatus::Expired);
    }

    #[tokio::test]
    async fn test_settle_unknown_id_is_none() {
        let store = MemoryStore::new();
        let result = store
            .settle_if_pending("ghost", &Settlement::expiry(Utc::now()))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_list_overdue_pending_orders_and_limits() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert(&pending("fresh", now)).await.unwrap();
        store.insert(&pending("older", now - Duration::minutes(30))).await.unwrap();
        store.insert(&pending("old", now - Duration::minutes(20))).await.unwrap();
        store.insert(&pending("settled", now - Duration::minutes(40))).await.unwrap();
        store
            .settle_if_pending("settled", &Settlement::expiry(now))
            .await
            .unwrap();

        let overdue = store.list_overdue_pending(now, 10).await.unwrap();
        let ids: Vec<_> = overdue.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["older", "old"]);

        let limited = store.list_overdue_pending(now, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, "older");
    }

    #[tokio::test]
    async fn test_attach_message_ref() {
        let store = MemoryStore::new();
        store.insert(&pending("r1", Utc::now())).await.unwrap();
        store.attach_message_ref("r1", "777").await.unwrap();
        let stored = store.get("r1").await.unwrap().unwrap();
        assert_eq!(stored.notification_message_ref.as_deref(), Some("777"));

        assert!(store.attach_message_ref("ghost", "1").await.is_err());
    }
}
