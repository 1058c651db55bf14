//! State-machine edits shared by every backend.
//!
//! Each function mutates the vote in place when the transition is allowed
//! and reports whether it did. Backends wrap the call in their own atomic
//! step together with the counter and slot bookkeeping.

use ballot_types::{Inclusion, Timestamp, VerificationStatus, Vote};

use crate::{BallotReservation, IdempotencyEntry, ReserveOutcome};

pub fn apply_verified(vote: &mut Vote, inclusion: &Inclusion, at: Timestamp) -> bool {
    if vote.status != VerificationStatus::Pending {
        return false;
    }
    vote.status = VerificationStatus::Verified;
    vote.block_number = Some(inclusion.block_number);
    vote.block_hash = Some(inclusion.block_hash);
    vote.gas_used = inclusion.gas_used;
    vote.resolved_at = Some(at);
    true
}

pub fn apply_failed(vote: &mut Vote, reason: &str, at: Timestamp) -> bool {
    if vote.status != VerificationStatus::Pending {
        return false;
    }
    vote.status = VerificationStatus::Failed;
    vote.failure_reason = Some(reason.to_string());
    vote.resolved_at = Some(at);
    true
}

pub fn apply_invalidated(vote: &mut Vote, at: Timestamp) -> bool {
    if vote.status != VerificationStatus::Verified || !vote.is_valid {
        return false;
    }
    vote.is_valid = false;
    vote.invalidated_at = Some(at);
    true
}

/// Decide what an existing idempotency entry means for a new reservation.
///
/// `committed` is the vote the entry points at, when it is `Committed`.
pub fn idempotency_outcome(
    entry: &IdempotencyEntry,
    committed: Option<Vote>,
    reservation: &BallotReservation,
) -> ReserveOutcome {
    match (entry, committed) {
        (IdempotencyEntry::InFlight { voter, election }, _) => {
            if voter == &reservation.voter && election == &reservation.election {
                ReserveOutcome::InFlight
            } else {
                ReserveOutcome::KeyConflict
            }
        }
        (IdempotencyEntry::Committed(_), Some(vote)) => {
            if vote.voter == reservation.voter && vote.election == reservation.election {
                ReserveOutcome::Replay(vote)
            } else {
                ReserveOutcome::KeyConflict
            }
        }
        (IdempotencyEntry::Committed(_), None) => ReserveOutcome::KeyConflict,
    }
}
