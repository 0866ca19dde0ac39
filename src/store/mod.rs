pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AccessRequest, Settlement};

/// Durable keyed storage for access requests.
/// Implementations: PgStore (PostgreSQL), MemoryStore (DashMap, local dev and tests).
///
/// The only mutation discipline required is that `settle_if_pending` is an
/// atomic compare-and-set on `status` per record.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new pending record. Returns `false` and leaves the existing
    /// row untouched when the id is already taken.
    async fn insert(&self, request: &AccessRequest) -> anyhow::Result<bool>;

    async fn get(&self, id: &str) -> anyhow::Result<Option<AccessRequest>>;

    /// Record the outbound notification reference used for later edits.
    async fn attach_message_ref(&self, id: &str, message_ref: &str) -> anyhow::Result<()>;

    /// Apply `settlement` only if the record is still `pending` (and, for
    /// reviewer decisions, still inside its window). Returns the updated
    /// record, or `None` when the precondition no longer held.
    async fn settle_if_pending(
        &self,
        id: &str,
        settlement: &Settlement,
    ) -> anyhow::Result<Option<AccessRequest>>;

    /// Pending records whose `expires_at <= now`, oldest expiry first.
    async fn list_overdue_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<AccessRequest>>;
}
