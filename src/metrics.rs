//! Prometheus metrics for the approval relay.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Each recorder owns its own registry so that several managers (tests,
//! CLI one-shots) can coexist in one process.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct RelayMetrics {
    registry: Registry,
    requests_created: IntCounter,
    decisions: IntCounterVec,
    expired: IntCounterVec,
    side_effect_failures: IntCounterVec,
}

impl RelayMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_created = IntCounter::with_opts(Opts::new(
            "relay_requests_created_total",
            "Access requests accepted and persisted",
        ))?;
        let decisions = IntCounterVec::new(
            Opts::new("relay_decisions_total", "Reviewer decisions by outcome"),
            &["outcome"],
        )?;
        let expired = IntCounterVec::new(
            Opts::new("relay_expired_total", "Requests transitioned to expired"),
            &["source"],
        )?;
        let side_effect_failures = IntCounterVec::new(
            Opts::new(
                "relay_side_effect_failures_total",
                "Post-commit notification/backend failures",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(requests_created.clone()))?;
        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(expired.clone()))?;
        registry.register(Box::new(side_effect_failures.clone()))?;

        Ok(Self {
            registry,
            requests_created,
            decisions,
            expired,
            side_effect_failures,
        })
    }

    pub fn request_created(&self) {
        self.requests_created.inc();
    }

    /// `outcome` is one of "applied", "already_settled", "not_found", "invalid", "error".
    pub fn decision(&self, outcome: &str) {
        self.decisions.with_label_values(&[outcome]).inc();
    }

    /// `source` is "sweep" or "late_decision".
    pub fn expired(&self, source: &str) {
        self.expired.with_label_values(&[source]).inc();
    }

    pub fn side_effect_failure(&self, kind: &str) {
        self.side_effect_failures.with_label_values(&[kind]).inc();
    }

    /// Encode all registered metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}
