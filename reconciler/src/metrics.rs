//! Prometheus metrics for the reconciler.
//!
//! [`ReconcilerMetrics`] owns a dedicated [`Registry`] that the HTTP
//! `/metrics` endpoint encodes into the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub struct ReconcilerMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Votes committed with a transaction hash.
    pub votes_submitted: IntCounter,
    /// Submissions refused, labelled by reason.
    pub votes_rejected: IntCounterVec,
    pub votes_verified: IntCounter,
    pub votes_failed: IntCounter,
    /// Verified votes invalidated by an audit.
    pub votes_invalidated: IntCounter,
    /// Ledger submission retries after a transient error.
    pub ledger_retries: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Votes waiting for confirmation, as seen by this process.
    pub votes_pending: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Wall time of `submit_vote`, in seconds.
    pub submit_latency_seconds: Histogram,
}

impl ReconcilerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let votes_submitted = register_int_counter_with_registry!(
            Opts::new("ballot_votes_submitted_total", "Votes recorded with a ledger transaction"),
            registry
        )
        .expect("failed to register votes_submitted counter");

        let votes_rejected = register_int_counter_vec_with_registry!(
            Opts::new("ballot_votes_rejected_total", "Vote submissions refused"),
            &["reason"],
            registry
        )
        .expect("failed to register votes_rejected counter");

        let votes_verified = register_int_counter_with_registry!(
            Opts::new("ballot_votes_verified_total", "Votes promoted to verified"),
            registry
        )
        .expect("failed to register votes_verified counter");

        let votes_failed = register_int_counter_with_registry!(
            Opts::new("ballot_votes_failed_total", "Votes whose transaction failed"),
            registry
        )
        .expect("failed to register votes_failed counter");

        let votes_invalidated = register_int_counter_with_registry!(
            Opts::new(
                "ballot_votes_invalidated_total",
                "Verified votes invalidated after a chain reorganization"
            ),
            registry
        )
        .expect("failed to register votes_invalidated counter");

        let ledger_retries = register_int_counter_with_registry!(
            Opts::new("ballot_ledger_retries_total", "Ledger submission retries"),
            registry
        )
        .expect("failed to register ledger_retries counter");

        let votes_pending = register_int_gauge_with_registry!(
            Opts::new("ballot_votes_pending", "Votes awaiting confirmation"),
            registry
        )
        .expect("failed to register votes_pending gauge");

        let submit_latency_seconds = register_histogram_with_registry!(
            HistogramOpts::new(
                "ballot_submit_latency_seconds",
                "Time to reserve, submit and record a vote"
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            registry
        )
        .expect("failed to register submit_latency_seconds histogram");

        Self {
            registry,
            votes_submitted,
            votes_rejected,
            votes_verified,
            votes_failed,
            votes_invalidated,
            ledger_retries,
            votes_pending,
            submit_latency_seconds,
        }
    }

    pub fn record_rejection(&self, reason: &str) {
        self.votes_rejected.with_label_values(&[reason]).inc();
    }

    /// Encode every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for ReconcilerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
