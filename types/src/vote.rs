//! Votes, their verification lifecycle and the ballot payload sent on-chain.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    BlockHash, CandidateId, ElectionId, IdempotencyKey, Timestamp, TxHash, VoteId, VoterId,
};

/// Where a vote stands with respect to its ledger transaction.
///
/// `Pending → Verified` once the transaction is buried deep enough,
/// `Pending → Failed` on revert, drop or timeout. `Failed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request metadata captured at submission time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// The ballot payload submitted to the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: VoterId,
    pub candidate: CandidateId,
    pub election: ElectionId,
}

/// Where a transaction landed on the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inclusion {
    pub block_number: u64,
    pub block_hash: BlockHash,
    pub gas_used: Option<u64>,
}

/// A vote recorded off-chain and tied to one ledger transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub voter: VoterId,
    pub candidate: CandidateId,
    pub election: ElectionId,
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub block_hash: Option<BlockHash>,
    pub gas_used: Option<u64>,
    pub metadata: RequestMetadata,
    pub idempotency_key: Option<IdempotencyKey>,
    /// Cleared when an audit finds the transaction's block is no longer canonical.
    pub is_valid: bool,
    pub status: VerificationStatus,
    pub failure_reason: Option<String>,
    pub submitted_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
    pub invalidated_at: Option<Timestamp>,
}

impl Vote {
    /// A freshly submitted vote awaiting confirmation.
    pub fn pending(
        ballot: Ballot,
        tx_hash: TxHash,
        metadata: RequestMetadata,
        idempotency_key: Option<IdempotencyKey>,
        submitted_at: Timestamp,
    ) -> Self {
        let id = VoteId::derive(&ballot.election, &ballot.voter, &tx_hash);
        Self {
            id,
            voter: ballot.voter,
            candidate: ballot.candidate,
            election: ballot.election,
            tx_hash,
            block_number: None,
            block_hash: None,
            gas_used: None,
            metadata,
            idempotency_key,
            is_valid: true,
            status: VerificationStatus::Pending,
            failure_reason: None,
            submitted_at,
            resolved_at: None,
            invalidated_at: None,
        }
    }

    /// Whether this vote occupies the voter's ballot slot for its election.
    ///
    /// Failed votes free the slot so the voter can resubmit; invalidated
    /// votes keep it until an operator resolves the dispute.
    pub fn holds_ballot_slot(&self) -> bool {
        self.status != VerificationStatus::Failed
    }

    /// Whether this vote is included in the election's `total_votes`.
    pub fn is_counted(&self) -> bool {
        self.status == VerificationStatus::Verified && self.is_valid
    }

    pub fn inclusion(&self) -> Option<Inclusion> {
        Some(Inclusion {
            block_number: self.block_number?,
            block_hash: self.block_hash?,
            gas_used: self.gas_used,
        })
    }

    pub fn ballot(&self) -> Ballot {
        Ballot {
            voter: self.voter.clone(),
            candidate: self.candidate.clone(),
            election: self.election.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot() -> Ballot {
        Ballot {
            voter: VoterId::new("v").unwrap(),
            candidate: CandidateId::new("c").unwrap(),
            election: ElectionId::new("e").unwrap(),
        }
    }

    #[test]
    fn pending_vote_is_valid_but_not_counted() {
        let vote = Vote::pending(
            ballot(),
            TxHash::new([1u8; 32]),
            RequestMetadata::default(),
            None,
            Timestamp::new(10),
        );
        assert_eq!(vote.status, VerificationStatus::Pending);
        assert!(vote.is_valid);
        assert!(!vote.is_counted());
        assert!(vote.holds_ballot_slot());
        assert!(vote.inclusion().is_none());
        assert_eq!(vote.ballot(), ballot());
    }

    #[test]
    fn failed_vote_frees_the_slot() {
        let mut vote = Vote::pending(
            ballot(),
            TxHash::new([2u8; 32]),
            RequestMetadata::default(),
            None,
            Timestamp::new(10),
        );
        vote.status = VerificationStatus::Failed;
        assert!(!vote.holds_ballot_slot());
        assert!(vote.status.is_terminal());
    }

    #[test]
    fn invalidated_vote_keeps_the_slot_but_is_not_counted() {
        let mut vote = Vote::pending(
            ballot(),
            TxHash::new([3u8; 32]),
            RequestMetadata::default(),
            None,
            Timestamp::new(10),
        );
        vote.status = VerificationStatus::Verified;
        assert!(vote.is_counted());
        vote.is_valid = false;
        assert!(!vote.is_counted());
        assert!(vote.holds_ballot_slot());
    }
}
