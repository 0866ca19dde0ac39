//! Background job: expire pending requests whose approval window has closed.
//!
//! Runs on a fixed interval, independently of webhook traffic. It is not a
//! privileged writer; it goes through the same conditional update as
//! reviewer decisions.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::LifecycleManager;

/// Spawn the background expiry sweep. Call this once at startup.
pub fn spawn(manager: LifecycleManager, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        // a slow pass delays the next one instead of firing a burst
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match manager.sweep_expired(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(expired) => {
                    tracing::info!(expired, "expiry job transitioned overdue requests");
                }
                Err(e) => {
                    tracing::error!("expiry job failed: {}", e);
                }
            }
        }
    })
}
