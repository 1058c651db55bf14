//! Background sweeps: confirm pending votes and re-audit recent verified
//! ones. Both loops stop on the shutdown broadcast.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use ballot_types::VerificationStatus;

use crate::tracing_spans::sweep_span;
use crate::{AuditOutcome, ConfirmOutcome, ReconcileError, VoteReconciler};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stashed submissions turned into vote rows.
    pub adopted: usize,
    pub verified: usize,
    pub failed: usize,
    pub pending: usize,
    pub errors: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub checked: usize,
    pub invalidated: usize,
    pub errors: usize,
}

/// Periodically runs `confirm_vote` over every pending vote.
pub struct ConfirmationWorker {
    reconciler: Arc<VoteReconciler>,
    interval: Duration,
}

impl ConfirmationWorker {
    pub fn new(reconciler: Arc<VoteReconciler>) -> Self {
        let interval = reconciler.config().poll_interval();
        Self {
            reconciler,
            interval,
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        match self.reconciler.adopt_stashed() {
            Ok(adopted) => report.adopted = adopted,
            Err(e) => {
                warn!(error = %e, "failed to adopt stashed votes");
                report.errors += 1;
            }
        }

        let pending = match self.reconciler.pending_votes() {
            Ok(votes) => votes,
            Err(e) => {
                warn!(error = %e, "failed to list pending votes");
                report.errors += 1;
                return report;
            }
        };

        for vote in pending {
            match self.reconciler.confirm_vote(&vote.id).await {
                Ok(ConfirmOutcome::Verified(_)) => report.verified += 1,
                Ok(ConfirmOutcome::AlreadyVerified(_)) => {}
                Ok(ConfirmOutcome::Pending { .. }) => report.pending += 1,
                Err(ReconcileError::TransactionFailed { .. }) => report.failed += 1,
                Err(e) => {
                    debug!(vote = %vote.id, error = %e, "confirmation attempt failed");
                    report.errors += 1;
                }
            }
        }
        report
    }

    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        info!("confirmation worker shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = self.sweep().instrument(sweep_span("confirmation")).await;
                        if report != SweepReport::default() {
                            info!(
                                adopted = report.adopted,
                                verified = report.verified,
                                failed = report.failed,
                                pending = report.pending,
                                errors = report.errors,
                                "confirmation sweep"
                            );
                        }
                    }
                }
            }
        })
    }
}

/// Periodically re-audits votes verified within the audit window.
pub struct AuditWorker {
    reconciler: Arc<VoteReconciler>,
    interval: Duration,
    window_secs: u64,
}

impl AuditWorker {
    pub fn new(reconciler: Arc<VoteReconciler>) -> Self {
        let interval = reconciler.config().audit_interval();
        let window_secs = reconciler.config().audit_window_secs;
        Self {
            reconciler,
            interval,
            window_secs,
        }
    }

    pub async fn sweep(&self) -> AuditReport {
        let mut report = AuditReport::default();
        let now = self.reconciler.clock.now();
        let verified = match self
            .reconciler
            .store
            .votes_with_status(VerificationStatus::Verified)
        {
            Ok(votes) => votes,
            Err(e) => {
                warn!(error = %e, "failed to list verified votes");
                report.errors += 1;
                return report;
            }
        };

        let recent = verified.into_iter().filter(|v| {
            v.is_valid
                && v
                    .resolved_at
                    .map_or(false, |at| !at.has_expired(self.window_secs, now))
        });
        for vote in recent {
            report.checked += 1;
            match self.reconciler.audit_vote(&vote.id).await {
                Ok(AuditOutcome::Canonical(_)) => {}
                Ok(AuditOutcome::NotVerified(_) | AuditOutcome::AlreadyInvalidated(_)) => {}
                Err(ReconcileError::ReorgDetected { .. }) => report.invalidated += 1,
                Err(e) => {
                    debug!(vote = %vote.id, error = %e, "audit attempt failed");
                    report.errors += 1;
                }
            }
        }
        report
    }

    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        info!("audit worker shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = self.sweep().instrument(sweep_span("audit")).await;
                        if report.invalidated > 0 || report.errors > 0 {
                            warn!(
                                checked = report.checked,
                                invalidated = report.invalidated,
                                errors = report.errors,
                                "audit sweep found problems"
                            );
                        }
                    }
                }
            }
        })
    }
}
