//! Approval Relay: library crate.
//!
//! Relays privilege-access requests to a reviewer over Telegram, records the
//! decision exactly once, expires requests nobody answered, and forwards the
//! outcome to a backend. Re-exports modules needed by integration tests in `tests/`.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod store;

/// Shared application state passed to handlers.
pub struct AppState {
    pub lifecycle: lifecycle::LifecycleManager,
    pub config: config::Config,
}
