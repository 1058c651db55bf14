//! Vote storage trait: ballot slots, idempotency keys and vote transitions.

use serde::{Deserialize, Serialize};

use crate::StoreError;
use ballot_types::{
    ElectionId, IdempotencyKey, Inclusion, Timestamp, TxHash, VerificationStatus, Vote, VoteId,
    VoterId,
};

/// A claim on a voter's ballot slot, taken before anything is sent on-chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BallotReservation {
    pub voter: VoterId,
    pub election: ElectionId,
    pub idempotency_key: Option<IdempotencyKey>,
    pub reserved_at: Timestamp,
    /// A `Reserved` slot older than this many seconds was abandoned by a
    /// process that died mid-submission and may be taken over.
    pub stale_after_secs: u64,
}

impl BallotReservation {
    /// Whether `slot` is an abandoned reservation this one may replace.
    pub fn supersedes(&self, slot: &SlotEntry) -> bool {
        match slot {
            SlotEntry::Reserved { reserved_at, .. } => {
                reserved_at.has_expired(self.stale_after_secs, self.reserved_at)
            }
            SlotEntry::Cast(_) | SlotEntry::Submitted(_) => false,
        }
    }
}

/// Occupant of a (voter, election) ballot slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotEntry {
    /// A submission is talking to the ledger; no vote row exists yet.
    Reserved {
        idempotency_key: Option<IdempotencyKey>,
        reserved_at: Timestamp,
    },
    /// A live (pending or verified) vote holds the slot.
    Cast(VoteId),
    /// The ledger accepted this vote's transaction but the vote row was never
    /// written. Held until [`VoteStore::commit_vote`] adopts it.
    Submitted(Box<Vote>),
}

/// What an idempotency key is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyEntry {
    InFlight { voter: VoterId, election: ElectionId },
    Committed(VoteId),
}

/// Result of [`VoteStore::reserve_ballot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The slot is now held by the caller.
    Reserved,
    /// The idempotency key already produced this vote.
    Replay(Vote),
    /// The idempotency key belongs to a submission that hasn't finished.
    InFlight,
    /// The idempotency key was used for a different voter or election.
    KeyConflict,
    /// Another submission or a live vote holds the slot.
    Duplicate,
}

/// Result of a compare-and-set vote transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The transition was applied; the vote as stored afterwards.
    Applied(Vote),
    /// The vote was not in the expected state; the vote as currently stored.
    Unchanged(Vote),
}

impl Transition {
    pub fn vote(&self) -> &Vote {
        match self {
            Self::Applied(vote) | Self::Unchanged(vote) => vote,
        }
    }

    pub fn into_vote(self) -> Vote {
        match self {
            Self::Applied(vote) | Self::Unchanged(vote) => vote,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Trait for storing votes.
pub trait VoteStore {
    /// Atomically check the idempotency key and the (voter, election) slot,
    /// and claim both when free.
    fn reserve_ballot(&self, reservation: &BallotReservation)
        -> Result<ReserveOutcome, StoreError>;

    /// Drop a reservation that never produced a vote. Leaves the slot and key
    /// alone if the slot holds a vote or a stashed submission. Returns
    /// whether anything was released.
    fn release_reservation(
        &self,
        voter: &VoterId,
        election: &ElectionId,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<bool, StoreError>;

    /// Turn the caller's reservation into a pending vote row. Fails with
    /// [`StoreError::Duplicate`] if the transaction hash is already recorded
    /// and [`StoreError::Conflict`] if the slot is neither reserved nor
    /// holding this very vote as a stashed submission.
    fn commit_vote(&self, vote: &Vote) -> Result<(), StoreError>;

    /// Park a vote whose transaction the ledger accepted but whose row could
    /// not be committed. The slot and idempotency key stay held.
    fn stash_submission(&self, vote: &Vote) -> Result<(), StoreError>;

    /// Votes parked by [`stash_submission`](Self::stash_submission).
    fn stashed_submissions(&self) -> Result<Vec<Vote>, StoreError>;

    /// What `key` is currently bound to, if anything.
    fn idempotency_entry(&self, key: &IdempotencyKey)
        -> Result<Option<IdempotencyEntry>, StoreError>;

    fn get_vote(&self, id: &VoteId) -> Result<Vote, StoreError>;

    fn find_vote_by_tx(&self, tx_hash: &TxHash) -> Result<Option<Vote>, StoreError>;

    /// All votes recorded for an election, in vote-id order.
    fn votes_for_election(&self, election: &ElectionId) -> Result<Vec<Vote>, StoreError>;

    /// Up to `limit` of an election's votes with ids strictly after `after`,
    /// in vote-id order.
    fn election_votes_page(
        &self,
        election: &ElectionId,
        after: Option<&VoteId>,
        limit: usize,
    ) -> Result<Vec<Vote>, StoreError>;

    fn votes_with_status(&self, status: VerificationStatus) -> Result<Vec<Vote>, StoreError>;

    /// `Pending → Verified`, recording the inclusion and incrementing the
    /// election counter in the same step.
    fn mark_verified(
        &self,
        id: &VoteId,
        inclusion: &Inclusion,
        at: Timestamp,
    ) -> Result<Transition, StoreError>;

    /// `Pending → Failed`, freeing the ballot slot. The counter is untouched.
    fn mark_failed(&self, id: &VoteId, reason: &str, at: Timestamp)
        -> Result<Transition, StoreError>;

    /// Clear `is_valid` on a verified vote and decrement the election counter
    /// in the same step. The row and its slot are kept.
    fn invalidate_vote(&self, id: &VoteId, at: Timestamp) -> Result<Transition, StoreError>;
}
