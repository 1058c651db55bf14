//! The vote ledger reconciler.
//!
//! Votes live in an off-chain store and each one is tied to exactly one
//! ledger transaction. [`VoteReconciler`] keeps the two in step:
//!
//! - `submit_vote` claims the voter's ballot slot, submits the ballot
//!   on-chain and records a pending vote carrying the transaction hash;
//! - `confirm_vote` promotes a pending vote once its transaction is buried
//!   deep enough, or fails it on revert, drop or timeout;
//! - `audit_vote` re-checks a verified vote against the canonical chain and
//!   invalidates it after a reorganization.
//!
//! The election's `total_votes` only moves inside the store's verify and
//! invalidate transitions, so it always equals the number of verified,
//! valid votes.

pub mod error;
pub mod metrics;
pub mod notify;
pub mod policy;
pub mod reconciler;
pub mod registry;
pub mod results;
pub mod tracing_spans;
pub mod workers;

pub use error::{ErrorClass, ReconcileError};
pub use metrics::ReconcilerMetrics;
pub use notify::{
    Notification, NotificationKind, Notifier, NotifyError, RecordingNotifier, TracingNotifier,
    WebhookNotifier,
};
pub use policy::{ConfirmationPolicy, ReconcilerConfig, RetryPolicy};
pub use reconciler::{
    AuditOutcome, ConfirmOutcome, SubmitReceipt, SubmitVote, VoteReconciler,
};
pub use registry::NewElection;
pub use results::{CandidateTally, ElectionResults, TallyReport};
pub use workers::{AuditReport, AuditWorker, ConfirmationWorker, SweepReport};
