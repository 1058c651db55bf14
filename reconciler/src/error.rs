use thiserror::Error;

use ballot_ledger::LedgerError;
use ballot_store::StoreError;
use ballot_types::{
    CandidateId, ElectionId, ElectionStatus, IdempotencyKey, TypeError, Vote, VoterId,
};

/// How a caller should treat a [`ReconcileError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is wrong; retrying it changes nothing.
    Validation,
    /// The ledger could not be reached or answered with a server error.
    Transient,
    /// The vote's transaction failed; a failed row is on record.
    Terminal,
    /// A verified vote no longer matches the canonical chain.
    Audit,
    /// Storage failure or broken invariant.
    Internal,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("election not found: {0}")]
    ElectionNotFound(ElectionId),

    #[error("election {election} already exists")]
    ElectionExists { election: ElectionId },

    #[error("invalid election: {0}")]
    InvalidElection(#[from] TypeError),

    #[error("election {election} is not open for voting (status: {status})")]
    ElectionNotOpen {
        election: ElectionId,
        status: ElectionStatus,
    },

    #[error("candidate {candidate} is not running in election {election}")]
    InvalidCandidate {
        election: ElectionId,
        candidate: CandidateId,
    },

    #[error("voter {voter} has already voted in election {election}")]
    DuplicateVote {
        voter: VoterId,
        election: ElectionId,
    },

    #[error("idempotency key {0} was used for a different ballot")]
    IdempotencyConflict(IdempotencyKey),

    #[error("a submission with idempotency key {0} is still in progress")]
    SubmissionInProgress(IdempotencyKey),

    #[error("vote not found: {0}")]
    VoteNotFound(String),

    #[error("ledger submission failed: {0}")]
    SubmissionFailed(#[source] LedgerError),

    #[error("transaction {} failed: {reason}", .vote.tx_hash)]
    TransactionFailed { vote: Box<Vote>, reason: String },

    #[error("reorg detected for vote {}: {reason}", .vote.id)]
    ReorgDetected { vote: Box<Vote>, reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ElectionNotFound(_)
            | Self::ElectionExists { .. }
            | Self::InvalidElection(_)
            | Self::ElectionNotOpen { .. }
            | Self::InvalidCandidate { .. }
            | Self::DuplicateVote { .. }
            | Self::IdempotencyConflict(_)
            | Self::SubmissionInProgress(_)
            | Self::VoteNotFound(_) => ErrorClass::Validation,
            Self::SubmissionFailed(_) | Self::Ledger(_) => ErrorClass::Transient,
            Self::TransactionFailed { .. } => ErrorClass::Terminal,
            Self::ReorgDetected { .. } => ErrorClass::Audit,
            Self::Store(_) => ErrorClass::Internal,
        }
    }

    /// Short label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ElectionNotFound(_) => "election_not_found",
            Self::ElectionExists { .. } => "election_exists",
            Self::InvalidElection(_) => "invalid_election",
            Self::ElectionNotOpen { .. } => "election_not_open",
            Self::InvalidCandidate { .. } => "invalid_candidate",
            Self::DuplicateVote { .. } => "duplicate_vote",
            Self::IdempotencyConflict(_) => "idempotency_conflict",
            Self::SubmissionInProgress(_) => "submission_in_progress",
            Self::VoteNotFound(_) => "vote_not_found",
            Self::SubmissionFailed(_) => "submission_failed",
            Self::TransactionFailed { .. } => "transaction_failed",
            Self::ReorgDetected { .. } => "reorg_detected",
            Self::Ledger(_) => "ledger",
            Self::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let election = ElectionId::new("e").unwrap();
        assert_eq!(
            ReconcileError::ElectionNotOpen {
                election: election.clone(),
                status: ElectionStatus::Completed,
            }
            .class(),
            ErrorClass::Validation
        );
        assert_eq!(
            ReconcileError::SubmissionFailed(LedgerError::Timeout).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            ReconcileError::Store(StoreError::Backend("disk".into())).class(),
            ErrorClass::Internal
        );
        assert_eq!(
            ReconcileError::DuplicateVote {
                voter: VoterId::new("v").unwrap(),
                election,
            }
            .reason(),
            "duplicate_vote"
        );
    }
}
