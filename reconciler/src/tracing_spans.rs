//! Pre-built [`tracing::Span`] constructors for reconciler operations.
//!
//! Consistent span names and field sets make it easy to follow one vote
//! from submission through confirmation and audit.

use tracing::{info_span, Span};

/// Span covering one `submit_vote` call.
pub fn submit_span(voter: &str, election: &str) -> Span {
    info_span!("submit_vote", voter = %voter, election = %election)
}

/// Span covering one `confirm_vote` call.
pub fn confirm_span(vote_id: &str) -> Span {
    info_span!("confirm_vote", vote = %vote_id)
}

/// Span covering one `audit_vote` call.
pub fn audit_span(vote_id: &str) -> Span {
    info_span!("audit_vote", vote = %vote_id)
}

/// Span covering one background sweep.
pub fn sweep_span(worker: &'static str) -> Span {
    info_span!("sweep", worker = worker)
}
