//! Nullable store — thread-safe in-memory storage for testing.
//!
//! All state sits behind one mutex, so every trait method is a single
//! atomic step just like an LMDB write transaction.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Mutex;

use ballot_store::transition::{
    apply_failed, apply_invalidated, apply_verified, idempotency_outcome,
};
use ballot_store::{
    BallotReservation, ElectionStore, IdempotencyEntry, MetaStore, ReserveOutcome, SlotEntry,
    StoreError, Transition, VoteStore,
};
use ballot_types::{
    Election, ElectionId, IdempotencyKey, Inclusion, Timestamp, TxHash, VerificationStatus, Vote,
    VoteId, VoterId,
};

#[derive(Default)]
struct Inner {
    elections: BTreeMap<ElectionId, Election>,
    counters: HashMap<ElectionId, u64>,
    votes: BTreeMap<VoteId, Vote>,
    slots: HashMap<(ElectionId, VoterId), SlotEntry>,
    tx_index: HashMap<TxHash, VoteId>,
    idempotency: HashMap<IdempotencyKey, IdempotencyEntry>,
    schema_version: u32,
    failing_commits: usize,
}

impl Inner {
    fn election(&self, id: &ElectionId) -> Result<Election, StoreError> {
        let mut election = self
            .elections
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("election {id}")))?;
        election.total_votes = self.counters.get(id).copied().unwrap_or(0);
        Ok(election)
    }

    fn vote_mut(&mut self, id: &VoteId) -> Result<&mut Vote, StoreError> {
        self.votes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("vote {id}")))
    }

    fn adjust_counter(&mut self, election: &ElectionId, increment: bool) {
        let counter = self.counters.entry(election.clone()).or_insert(0);
        *counter = if increment {
            counter.saturating_add(1)
        } else {
            counter.saturating_sub(1)
        };
    }
}

/// An in-memory election + vote store for testing.
#[derive(Default)]
pub struct NullStore {
    inner: Mutex<Inner>,
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite an election's counter, bypassing the vote transitions.
    /// Lets tests fabricate drift for tally checks.
    pub fn force_counter(&self, election: &ElectionId, value: u64) {
        self.inner
            .lock()
            .unwrap()
            .counters
            .insert(election.clone(), value);
    }

    /// Current occupant of a ballot slot.
    pub fn slot(&self, election: &ElectionId, voter: &VoterId) -> Option<SlotEntry> {
        self.inner
            .lock()
            .unwrap()
            .slots
            .get(&(election.clone(), voter.clone()))
            .cloned()
    }

    pub fn vote_count(&self) -> usize {
        self.inner.lock().unwrap().votes.len()
    }

    /// Make the next `n` calls to `commit_vote` fail with a backend error.
    pub fn fail_next_commits(&self, n: usize) {
        self.inner.lock().unwrap().failing_commits = n;
    }
}

impl ElectionStore for NullStore {
    fn insert_election(&self, election: &Election) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.elections.contains_key(&election.id) {
            return Err(StoreError::Duplicate(format!("election {}", election.id)));
        }
        let mut record = election.clone();
        record.total_votes = 0;
        inner.elections.insert(election.id.clone(), record);
        inner.counters.insert(election.id.clone(), 0);
        Ok(())
    }

    fn modify_election(
        &self,
        id: &ElectionId,
        edit: &mut dyn FnMut(&mut Election),
    ) -> Result<Election, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut election = inner.election(id)?;
        let total_votes = election.total_votes;
        edit(&mut election);
        election.id = id.clone();
        election.total_votes = 0;
        inner.elections.insert(id.clone(), election.clone());
        election.total_votes = total_votes;
        Ok(election)
    }

    fn get_election(&self, id: &ElectionId) -> Result<Election, StoreError> {
        self.inner.lock().unwrap().election(id)
    }

    fn list_elections(&self) -> Result<Vec<Election>, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner.elections.keys().map(|id| inner.election(id)).collect()
    }
}

impl VoteStore for NullStore {
    fn reserve_ballot(
        &self,
        reservation: &BallotReservation,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let slot = (reservation.election.clone(), reservation.voter.clone());
        let held = inner.slots.get(&slot).cloned();
        let abandoned = held.as_ref().is_some_and(|held| reservation.supersedes(held));

        if let Some(key) = &reservation.idempotency_key {
            if let Some(entry) = inner.idempotency.get(key) {
                let committed = match entry {
                    IdempotencyEntry::Committed(id) => inner.votes.get(id).cloned(),
                    IdempotencyEntry::InFlight { .. } => None,
                };
                let outcome = idempotency_outcome(entry, committed, reservation);
                if !(abandoned && outcome == ReserveOutcome::InFlight) {
                    return Ok(outcome);
                }
            }
        }

        match held {
            None => {}
            Some(SlotEntry::Reserved {
                idempotency_key: Some(old),
                ..
            }) if abandoned => {
                if Some(&old) != reservation.idempotency_key.as_ref() {
                    inner.idempotency.remove(&old);
                }
            }
            Some(_) if abandoned => {}
            Some(_) => return Ok(ReserveOutcome::Duplicate),
        }

        inner.slots.insert(
            slot,
            SlotEntry::Reserved {
                idempotency_key: reservation.idempotency_key.clone(),
                reserved_at: reservation.reserved_at,
            },
        );
        if let Some(key) = &reservation.idempotency_key {
            inner.idempotency.insert(
                key.clone(),
                IdempotencyEntry::InFlight {
                    voter: reservation.voter.clone(),
                    election: reservation.election.clone(),
                },
            );
        }
        Ok(ReserveOutcome::Reserved)
    }

    fn release_reservation(
        &self,
        voter: &VoterId,
        election: &ElectionId,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut released = false;

        let slot = (election.clone(), voter.clone());
        match inner.slots.get(&slot) {
            Some(SlotEntry::Reserved { .. }) => {
                inner.slots.remove(&slot);
                released = true;
            }
            Some(SlotEntry::Submitted(_)) => return Ok(false),
            Some(SlotEntry::Cast(_)) | None => {}
        }
        if let Some(key) = idempotency_key {
            let held_by_caller = matches!(
                inner.idempotency.get(key),
                Some(IdempotencyEntry::InFlight { voter: v, election: e })
                    if v == voter && e == election
            );
            if held_by_caller {
                inner.idempotency.remove(key);
                released = true;
            }
        }
        Ok(released)
    }

    fn commit_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_commits > 0 {
            inner.failing_commits -= 1;
            return Err(StoreError::Backend("injected commit failure".into()));
        }
        let slot = (vote.election.clone(), vote.voter.clone());
        match inner.slots.get(&slot) {
            Some(SlotEntry::Reserved { .. }) => {}
            Some(SlotEntry::Submitted(stashed)) if stashed.id == vote.id => {}
            Some(SlotEntry::Submitted(stashed)) => {
                return Err(StoreError::Conflict(format!(
                    "voter {} has stashed vote {} in election {}",
                    vote.voter, stashed.id, vote.election
                )))
            }
            Some(SlotEntry::Cast(existing)) => {
                return Err(StoreError::Conflict(format!(
                    "voter {} already holds vote {existing} in election {}",
                    vote.voter, vote.election
                )))
            }
            None => {
                return Err(StoreError::Conflict(format!(
                    "no reservation for voter {} in election {}",
                    vote.voter, vote.election
                )))
            }
        }
        if inner.tx_index.contains_key(&vote.tx_hash) {
            return Err(StoreError::Duplicate(format!("transaction {}", vote.tx_hash)));
        }

        inner.votes.insert(vote.id, vote.clone());
        inner.tx_index.insert(vote.tx_hash, vote.id);
        inner.slots.insert(slot, SlotEntry::Cast(vote.id));
        if let Some(key) = &vote.idempotency_key {
            inner
                .idempotency
                .insert(key.clone(), IdempotencyEntry::Committed(vote.id));
        }
        Ok(())
    }

    fn stash_submission(&self, vote: &Vote) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let slot = (vote.election.clone(), vote.voter.clone());
        match inner.slots.get(&slot) {
            Some(SlotEntry::Reserved { .. }) => {}
            Some(SlotEntry::Submitted(stashed)) if stashed.id == vote.id => return Ok(()),
            _ => {
                return Err(StoreError::Conflict(format!(
                    "no reservation to stash vote {} under",
                    vote.id
                )))
            }
        }
        inner
            .slots
            .insert(slot, SlotEntry::Submitted(Box::new(vote.clone())));
        Ok(())
    }

    fn stashed_submissions(&self) -> Result<Vec<Vote>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .slots
            .values()
            .filter_map(|slot| match slot {
                SlotEntry::Submitted(vote) => Some(vote.as_ref().clone()),
                _ => None,
            })
            .collect())
    }

    fn idempotency_entry(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyEntry>, StoreError> {
        Ok(self.inner.lock().unwrap().idempotency.get(key).cloned())
    }

    fn get_vote(&self, id: &VoteId) -> Result<Vote, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .votes
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("vote {id}")))
    }

    fn find_vote_by_tx(&self, tx_hash: &TxHash) -> Result<Option<Vote>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tx_index
            .get(tx_hash)
            .and_then(|id| inner.votes.get(id))
            .cloned())
    }

    fn votes_for_election(&self, election: &ElectionId) -> Result<Vec<Vote>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .votes
            .values()
            .filter(|v| &v.election == election)
            .cloned()
            .collect())
    }

    fn election_votes_page(
        &self,
        election: &ElectionId,
        after: Option<&VoteId>,
        limit: usize,
    ) -> Result<Vec<Vote>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let start = match after {
            Some(after) => Bound::Excluded(*after),
            None => Bound::Unbounded,
        };
        Ok(inner
            .votes
            .range((start, Bound::Unbounded))
            .map(|(_, vote)| vote)
            .filter(|v| &v.election == election)
            .take(limit)
            .cloned()
            .collect())
    }

    fn votes_with_status(&self, status: VerificationStatus) -> Result<Vec<Vote>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .votes
            .values()
            .filter(|v| v.status == status)
            .cloned()
            .collect())
    }

    fn mark_verified(
        &self,
        id: &VoteId,
        inclusion: &Inclusion,
        at: Timestamp,
    ) -> Result<Transition, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let vote = inner.vote_mut(id)?;
        if !apply_verified(vote, inclusion, at) {
            return Ok(Transition::Unchanged(vote.clone()));
        }
        let vote = vote.clone();
        inner.adjust_counter(&vote.election, true);
        Ok(Transition::Applied(vote))
    }

    fn mark_failed(
        &self,
        id: &VoteId,
        reason: &str,
        at: Timestamp,
    ) -> Result<Transition, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let vote = inner.vote_mut(id)?;
        if !apply_failed(vote, reason, at) {
            return Ok(Transition::Unchanged(vote.clone()));
        }
        let vote = vote.clone();
        let slot = (vote.election.clone(), vote.voter.clone());
        if inner.slots.get(&slot) == Some(&SlotEntry::Cast(vote.id)) {
            inner.slots.remove(&slot);
        }
        Ok(Transition::Applied(vote))
    }

    fn invalidate_vote(&self, id: &VoteId, at: Timestamp) -> Result<Transition, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let vote = inner.vote_mut(id)?;
        if !apply_invalidated(vote, at) {
            return Ok(Transition::Unchanged(vote.clone()));
        }
        let vote = vote.clone();
        inner.adjust_counter(&vote.election, false);
        Ok(Transition::Applied(vote))
    }
}

impl MetaStore for NullStore {
    fn get_schema_version(&self) -> Result<u32, StoreError> {
        Ok(self.inner.lock().unwrap().schema_version)
    }

    fn set_schema_version(&self, version: u32) -> Result<(), StoreError> {
        self.inner.lock().unwrap().schema_version = version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_types::{Ballot, BlockHash, Candidate, CandidateId, ElectionSettings, RequestMetadata};
    use std::sync::Arc;

    fn election() -> Election {
        Election {
            id: ElectionId::new("e1").unwrap(),
            title: "Board".into(),
            description: String::new(),
            start_date: Timestamp::new(100),
            end_date: Timestamp::new(200),
            is_active: true,
            cancelled: false,
            candidates: vec![Candidate {
                id: CandidateId::new("alice").unwrap(),
                name: "Alice".into(),
            }],
            total_votes: 0,
            settings: ElectionSettings::default(),
            created_at: Timestamp::new(90),
        }
    }

    fn reservation(voter: &str) -> BallotReservation {
        BallotReservation {
            voter: VoterId::new(voter).unwrap(),
            election: ElectionId::new("e1").unwrap(),
            idempotency_key: None,
            reserved_at: Timestamp::new(150),
            stale_after_secs: 300,
        }
    }

    fn vote(r: &BallotReservation, tx: u8) -> Vote {
        Vote::pending(
            Ballot {
                voter: r.voter.clone(),
                candidate: CandidateId::new("alice").unwrap(),
                election: r.election.clone(),
            },
            TxHash::new([tx; 32]),
            RequestMetadata::default(),
            r.idempotency_key.clone(),
            Timestamp::new(150),
        )
    }

    fn inclusion() -> Inclusion {
        Inclusion {
            block_number: 3,
            block_hash: BlockHash::new([3; 32]),
            gas_used: None,
        }
    }

    #[test]
    fn one_reservation_wins_across_threads() {
        let store = Arc::new(NullStore::new());
        store.insert_election(&election()).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.reserve_ballot(&reservation("v1")).unwrap())
            })
            .collect();
        let reserved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == ReserveOutcome::Reserved)
            .count();
        assert_eq!(reserved, 1);
    }

    #[test]
    fn counter_follows_transitions() {
        let store = NullStore::new();
        let e = election();
        store.insert_election(&e).unwrap();
        let r = reservation("v1");
        store.reserve_ballot(&r).unwrap();
        let v = vote(&r, 1);
        store.commit_vote(&v).unwrap();

        assert!(store.mark_verified(&v.id, &inclusion(), Timestamp::new(160)).unwrap().applied());
        assert!(!store.mark_verified(&v.id, &inclusion(), Timestamp::new(161)).unwrap().applied());
        assert_eq!(store.get_election(&e.id).unwrap().total_votes, 1);

        assert!(store.invalidate_vote(&v.id, Timestamp::new(170)).unwrap().applied());
        assert!(!store.invalidate_vote(&v.id, Timestamp::new(171)).unwrap().applied());
        assert_eq!(store.get_election(&e.id).unwrap().total_votes, 0);
        assert_eq!(store.slot(&e.id, &v.voter), Some(SlotEntry::Cast(v.id)));
    }

    #[test]
    fn failure_frees_the_slot() {
        let store = NullStore::new();
        store.insert_election(&election()).unwrap();
        let r = reservation("v1");
        store.reserve_ballot(&r).unwrap();
        let v = vote(&r, 1);
        store.commit_vote(&v).unwrap();
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Duplicate);

        store.mark_failed(&v.id, "reverted", Timestamp::new(160)).unwrap();
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Reserved);
        assert_eq!(store.get_election(&v.election).unwrap().total_votes, 0);
    }

    #[test]
    fn commit_requires_reservation_and_unique_hash() {
        let store = NullStore::new();
        store.insert_election(&election()).unwrap();
        let r1 = reservation("v1");
        assert!(matches!(
            store.commit_vote(&vote(&r1, 1)),
            Err(StoreError::Conflict(_))
        ));
        store.reserve_ballot(&r1).unwrap();
        store.commit_vote(&vote(&r1, 1)).unwrap();

        let r2 = reservation("v2");
        store.reserve_ballot(&r2).unwrap();
        assert!(matches!(
            store.commit_vote(&vote(&r2, 1)),
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.vote_count(), 1);
    }

    #[test]
    fn idempotent_replay() {
        let store = NullStore::new();
        store.insert_election(&election()).unwrap();
        let r = BallotReservation {
            idempotency_key: Some(IdempotencyKey::new("k1").unwrap()),
            ..reservation("v1")
        };
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Reserved);
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::InFlight);
        let v = vote(&r, 1);
        store.commit_vote(&v).unwrap();
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Replay(v));
    }

    #[test]
    fn injected_commit_failures_keep_the_reservation() {
        let store = NullStore::new();
        let r = BallotReservation {
            idempotency_key: Some(IdempotencyKey::new("k2").unwrap()),
            ..reservation("v1")
        };
        store.reserve_ballot(&r).unwrap();
        let v = vote(&r, 2);

        store.fail_next_commits(1);
        assert!(matches!(store.commit_vote(&v), Err(StoreError::Backend(_))));
        store.stash_submission(&v).unwrap();
        assert_eq!(store.stashed_submissions().unwrap(), vec![v.clone()]);
        assert!(!store
            .release_reservation(&r.voter, &r.election, r.idempotency_key.as_ref())
            .unwrap());
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::InFlight);

        store.commit_vote(&v).unwrap();
        assert!(store.stashed_submissions().unwrap().is_empty());
        assert_eq!(store.slot(&v.election, &v.voter), Some(SlotEntry::Cast(v.id)));
    }

    #[test]
    fn stale_reservation_is_taken_over() {
        let store = NullStore::new();
        let r = reservation("v1");
        store.reserve_ballot(&r).unwrap();
        let retry = BallotReservation {
            reserved_at: Timestamp::new(449),
            ..r.clone()
        };
        assert_eq!(store.reserve_ballot(&retry).unwrap(), ReserveOutcome::Duplicate);
        let retry = BallotReservation {
            reserved_at: Timestamp::new(450),
            ..r
        };
        assert_eq!(store.reserve_ballot(&retry).unwrap(), ReserveOutcome::Reserved);
    }

    #[test]
    fn schema_version_roundtrip() {
        let store = NullStore::new();
        assert_eq!(store.get_schema_version().unwrap(), 0);
        store.set_schema_version(1).unwrap();
        assert_eq!(store.get_schema_version().unwrap(), 1);
    }
}
