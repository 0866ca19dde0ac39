use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

use super::{store_precision, LifecycleManager};
use crate::errors::AppError;
use crate::models::Settlement;

impl LifecycleManager {
    /// Expire every pending request whose window has closed by `now`.
    ///
    /// Uses the same conditional update as the decision path, so a sweep
    /// racing a button press settles to whichever write lands first. A
    /// failure on one record is logged and the rest of the batch continues.
    /// Returns how many records this pass transitioned.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let now = store_precision(now);
        let overdue = self
            .store
            .list_overdue_pending(now, self.config.sweep_batch_size)
            .await
            .map_err(AppError::from_store)?;

        if overdue.is_empty() {
            return Ok(0);
        }
        debug!(candidates = overdue.len(), "expiry sweep started");

        let expired = AtomicUsize::new(0);
        let settlement = Settlement::expiry(now);

        stream::iter(overdue)
            .for_each_concurrent(self.config.sweep_concurrency.max(1), |request| {
                let expired = &expired;
                let settlement = &settlement;
                async move {
                    match self.store.settle_if_pending(&request.id, settlement).await {
                        Ok(Some(record)) => {
                            expired.fetch_add(1, Ordering::Relaxed);
                            self.metrics.expired("sweep");
                            info!(request_id = %record.id, expires_at = %record.expires_at, "request expired");
                            self.publish_settlement(&record).await;
                        }
                        Ok(None) => {
                            debug!(request_id = %request.id, "request settled before sweep reached it");
                        }
                        Err(e) => {
                            error!(request_id = %request.id, error = %e, "failed to expire request, continuing sweep");
                        }
                    }
                }
            })
            .await;

        let count = expired.into_inner();
        if count > 0 {
            info!(count, "expiry sweep finished");
        }
        Ok(count)
    }
}
