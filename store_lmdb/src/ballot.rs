//! LMDB implementation of ElectionStore and VoteStore.
//!
//! Layout:
//! - `elections`: election id → bincode [`Election`] (counter field zeroed)
//! - `vote_counters`: election id → `u64` big-endian `total_votes`
//! - `votes`: vote id → bincode [`Vote`]
//! - `ballot_slots`: `len ++ election ++ voter` → bincode [`SlotEntry`]
//! - `tx_index`: tx hash → vote id
//! - `idempotency`: key → bincode [`IdempotencyEntry`]
//! - `election_votes`: `len ++ election ++ vote_id` → empty
//!
//! Every trait method runs in exactly one read or write transaction.

use std::ops::Bound;

use heed::types::Bytes;
use heed::{Database, Env, RoTxn, RwTxn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use ballot_store::transition::{
    apply_failed, apply_invalidated, apply_verified, idempotency_outcome,
};
use ballot_store::{
    BallotReservation, ElectionStore, IdempotencyEntry, ReserveOutcome, SlotEntry, StoreError,
    Transition, VoteStore,
};
use ballot_types::{
    Election, ElectionId, IdempotencyKey, Inclusion, Timestamp, TxHash, VerificationStatus, Vote,
    VoteId, VoterId,
};

use crate::keys::{election_prefix, election_vote_key, increment_prefix, slot_key};
use crate::LmdbError;

/// Election and vote storage over a shared LMDB environment.
#[derive(Clone)]
pub struct LmdbBallotStore {
    pub(crate) env: Env,
    pub(crate) elections_db: Database<Bytes, Bytes>,
    pub(crate) vote_counters_db: Database<Bytes, Bytes>,
    pub(crate) votes_db: Database<Bytes, Bytes>,
    pub(crate) ballot_slots_db: Database<Bytes, Bytes>,
    pub(crate) tx_index_db: Database<Bytes, Bytes>,
    pub(crate) idempotency_db: Database<Bytes, Bytes>,
    pub(crate) election_votes_db: Database<Bytes, Bytes>,
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LmdbError> {
    Ok(bincode::deserialize(bytes)?)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LmdbError> {
    Ok(bincode::serialize(value)?)
}

fn decode_counter(bytes: &[u8]) -> Result<u64, LmdbError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LmdbError::Corruption("vote counter has unexpected byte length".into()))?;
    Ok(u64::from_be_bytes(arr))
}

impl LmdbBallotStore {
    // ── Reads shared by read and write transactions ─────────────────────

    fn read_counter(&self, txn: &RoTxn, election: &ElectionId) -> Result<u64, LmdbError> {
        match self
            .vote_counters_db
            .get(txn, election.as_str().as_bytes())?
        {
            Some(bytes) => decode_counter(bytes),
            None => Ok(0),
        }
    }

    fn read_election(&self, txn: &RoTxn, id: &ElectionId) -> Result<Election, LmdbError> {
        let bytes = self
            .elections_db
            .get(txn, id.as_str().as_bytes())?
            .ok_or_else(|| LmdbError::NotFound(format!("election {id}")))?;
        let mut election: Election = decode(bytes)?;
        election.total_votes = self.read_counter(txn, id)?;
        Ok(election)
    }

    fn read_vote(&self, txn: &RoTxn, id: &VoteId) -> Result<Vote, LmdbError> {
        let bytes = self
            .votes_db
            .get(txn, id.as_bytes())?
            .ok_or_else(|| LmdbError::NotFound(format!("vote {id}")))?;
        decode(bytes)
    }

    fn read_slot(
        &self,
        txn: &RoTxn,
        election: &ElectionId,
        voter: &VoterId,
    ) -> Result<Option<SlotEntry>, LmdbError> {
        self.ballot_slots_db
            .get(txn, &slot_key(election, voter))?
            .map(decode)
            .transpose()
    }

    fn read_idempotency(
        &self,
        txn: &RoTxn,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyEntry>, LmdbError> {
        self.idempotency_db
            .get(txn, key.as_str().as_bytes())?
            .map(decode)
            .transpose()
    }

    // ── Writes ──────────────────────────────────────────────────────────

    fn write_vote(&self, txn: &mut RwTxn, vote: &Vote) -> Result<(), LmdbError> {
        self.votes_db
            .put(txn, vote.id.as_bytes(), &encode(vote)?)?;
        Ok(())
    }

    fn adjust_counter(
        &self,
        txn: &mut RwTxn,
        election: &ElectionId,
        increment: bool,
    ) -> Result<u64, LmdbError> {
        let current = self.read_counter(txn, election)?;
        let next = if increment {
            current.saturating_add(1)
        } else {
            current.saturating_sub(1)
        };
        self.vote_counters_db
            .put(txn, election.as_str().as_bytes(), &next.to_be_bytes())?;
        Ok(next)
    }

    fn vote_ids_for_election(
        &self,
        txn: &RoTxn,
        election: &ElectionId,
    ) -> Result<Vec<VoteId>, LmdbError> {
        self.vote_ids_page(txn, election, None, usize::MAX)
    }

    /// Up to `limit` vote ids of one election, strictly after `after`.
    fn vote_ids_page(
        &self,
        txn: &RoTxn,
        election: &ElectionId,
        after: Option<&VoteId>,
        limit: usize,
    ) -> Result<Vec<VoteId>, LmdbError> {
        let prefix = election_prefix(election);
        let start = after.map(|id| election_vote_key(election, id));
        let mut upper = prefix.clone();
        let bounded = increment_prefix(&mut upper);
        let bounds = (
            match &start {
                Some(start) => Bound::Excluded(start.as_slice()),
                None => Bound::Included(prefix.as_slice()),
            },
            if bounded {
                Bound::Excluded(upper.as_slice())
            } else {
                Bound::Unbounded
            },
        );
        let mut ids = Vec::new();
        for entry in self.election_votes_db.range(txn, &bounds)? {
            if ids.len() >= limit {
                break;
            }
            let (key, _) = entry?;
            let id = VoteId::from_slice(&key[prefix.len()..]).ok_or_else(|| {
                LmdbError::Corruption(format!("malformed election vote key for {election}"))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }
}

impl ElectionStore for LmdbBallotStore {
    fn insert_election(&self, election: &Election) -> Result<(), StoreError> {
        let key = election.id.as_str().as_bytes();
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self
            .elections_db
            .get(&wtxn, key)
            .map_err(LmdbError::from)?
            .is_some()
        {
            return Err(StoreError::Duplicate(format!("election {}", election.id)));
        }
        let mut record = election.clone();
        record.total_votes = 0;
        self.elections_db
            .put(&mut wtxn, key, &encode(&record)?)
            .map_err(LmdbError::from)?;
        self.vote_counters_db
            .put(&mut wtxn, key, &0u64.to_be_bytes())
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn modify_election(
        &self,
        id: &ElectionId,
        edit: &mut dyn FnMut(&mut Election),
    ) -> Result<Election, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut election = self.read_election(&wtxn, id)?;
        let total_votes = election.total_votes;
        edit(&mut election);
        election.id = id.clone();

        let mut record = election.clone();
        record.total_votes = 0;
        self.elections_db
            .put(&mut wtxn, id.as_str().as_bytes(), &encode(&record)?)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;

        election.total_votes = total_votes;
        Ok(election)
    }

    fn get_election(&self, id: &ElectionId) -> Result<Election, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(self.read_election(&rtxn, id)?)
    }

    fn list_elections(&self) -> Result<Vec<Election>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let mut elections = Vec::new();
        for entry in self.elections_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (_, bytes) = entry.map_err(LmdbError::from)?;
            let mut election: Election = decode(bytes)?;
            election.total_votes = self.read_counter(&rtxn, &election.id)?;
            elections.push(election);
        }
        Ok(elections)
    }
}

impl VoteStore for LmdbBallotStore {
    fn reserve_ballot(
        &self,
        reservation: &BallotReservation,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let held = self.read_slot(&wtxn, &reservation.election, &reservation.voter)?;
        let abandoned = held.as_ref().is_some_and(|slot| reservation.supersedes(slot));

        if let Some(key) = &reservation.idempotency_key {
            if let Some(entry) = self.read_idempotency(&wtxn, key)? {
                let committed = match &entry {
                    IdempotencyEntry::Committed(id) => Some(self.read_vote(&wtxn, id)?),
                    IdempotencyEntry::InFlight { .. } => None,
                };
                let outcome = idempotency_outcome(&entry, committed, reservation);
                if !(abandoned && outcome == ReserveOutcome::InFlight) {
                    return Ok(outcome);
                }
            }
        }

        match &held {
            None => {}
            Some(SlotEntry::Reserved {
                idempotency_key,
                reserved_at,
            }) if abandoned => {
                if let Some(old) = idempotency_key {
                    if Some(old) != reservation.idempotency_key.as_ref() {
                        self.idempotency_db
                            .delete(&mut wtxn, old.as_str().as_bytes())
                            .map_err(LmdbError::from)?;
                    }
                }
                tracing::warn!(
                    voter = %reservation.voter,
                    election = %reservation.election,
                    %reserved_at,
                    "taking over abandoned ballot reservation"
                );
            }
            Some(_) => return Ok(ReserveOutcome::Duplicate),
        }

        let slot = SlotEntry::Reserved {
            idempotency_key: reservation.idempotency_key.clone(),
            reserved_at: reservation.reserved_at,
        };
        self.ballot_slots_db
            .put(
                &mut wtxn,
                &slot_key(&reservation.election, &reservation.voter),
                &encode(&slot)?,
            )
            .map_err(LmdbError::from)?;

        if let Some(key) = &reservation.idempotency_key {
            let entry = IdempotencyEntry::InFlight {
                voter: reservation.voter.clone(),
                election: reservation.election.clone(),
            };
            self.idempotency_db
                .put(&mut wtxn, key.as_str().as_bytes(), &encode(&entry)?)
                .map_err(LmdbError::from)?;
        }

        wtxn.commit().map_err(LmdbError::from)?;
        Ok(ReserveOutcome::Reserved)
    }

    fn release_reservation(
        &self,
        voter: &VoterId,
        election: &ElectionId,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut released = false;

        match self.read_slot(&wtxn, election, voter)? {
            Some(SlotEntry::Reserved { .. }) => {
                self.ballot_slots_db
                    .delete(&mut wtxn, &slot_key(election, voter))
                    .map_err(LmdbError::from)?;
                released = true;
            }
            // The ledger has the ballot; the key must keep pointing at it.
            Some(SlotEntry::Submitted(_)) => return Ok(false),
            Some(SlotEntry::Cast(_)) | None => {}
        }

        if let Some(key) = idempotency_key {
            if let Some(IdempotencyEntry::InFlight {
                voter: held_by,
                election: held_for,
            }) = self.read_idempotency(&wtxn, key)?
            {
                if &held_by == voter && &held_for == election {
                    self.idempotency_db
                        .delete(&mut wtxn, key.as_str().as_bytes())
                        .map_err(LmdbError::from)?;
                    released = true;
                }
            }
        }

        wtxn.commit().map_err(LmdbError::from)?;
        Ok(released)
    }

    fn commit_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;

        match self.read_slot(&wtxn, &vote.election, &vote.voter)? {
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

        if self
            .tx_index_db
            .get(&wtxn, vote.tx_hash.as_bytes())
            .map_err(LmdbError::from)?
            .is_some()
        {
            return Err(StoreError::Duplicate(format!("transaction {}", vote.tx_hash)));
        }

        self.write_vote(&mut wtxn, vote)?;
        self.tx_index_db
            .put(&mut wtxn, vote.tx_hash.as_bytes(), vote.id.as_bytes())
            .map_err(LmdbError::from)?;
        self.election_votes_db
            .put(&mut wtxn, &election_vote_key(&vote.election, &vote.id), &[])
            .map_err(LmdbError::from)?;
        self.ballot_slots_db
            .put(
                &mut wtxn,
                &slot_key(&vote.election, &vote.voter),
                &encode(&SlotEntry::Cast(vote.id))?,
            )
            .map_err(LmdbError::from)?;
        if let Some(key) = &vote.idempotency_key {
            self.idempotency_db
                .put(
                    &mut wtxn,
                    key.as_str().as_bytes(),
                    &encode(&IdempotencyEntry::Committed(vote.id))?,
                )
                .map_err(LmdbError::from)?;
        }

        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn stash_submission(&self, vote: &Vote) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        match self.read_slot(&wtxn, &vote.election, &vote.voter)? {
            Some(SlotEntry::Reserved { .. }) => {}
            Some(SlotEntry::Submitted(stashed)) if stashed.id == vote.id => return Ok(()),
            _ => {
                return Err(StoreError::Conflict(format!(
                    "no reservation to stash vote {} under",
                    vote.id
                )))
            }
        }
        self.ballot_slots_db
            .put(
                &mut wtxn,
                &slot_key(&vote.election, &vote.voter),
                &encode(&SlotEntry::Submitted(Box::new(vote.clone())))?,
            )
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn stashed_submissions(&self) -> Result<Vec<Vote>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let mut stashed = Vec::new();
        for entry in self.ballot_slots_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (_, bytes) = entry.map_err(LmdbError::from)?;
            let slot: SlotEntry = decode(bytes)?;
            if let SlotEntry::Submitted(vote) = slot {
                stashed.push(*vote);
            }
        }
        Ok(stashed)
    }

    fn idempotency_entry(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyEntry>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(self.read_idempotency(&rtxn, key)?)
    }

    fn get_vote(&self, id: &VoteId) -> Result<Vote, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(self.read_vote(&rtxn, id)?)
    }

    fn find_vote_by_tx(&self, tx_hash: &TxHash) -> Result<Option<Vote>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let Some(id_bytes) = self
            .tx_index_db
            .get(&rtxn, tx_hash.as_bytes())
            .map_err(LmdbError::from)?
        else {
            return Ok(None);
        };
        let id = VoteId::from_slice(id_bytes).ok_or_else(|| {
            LmdbError::Corruption(format!("malformed tx index entry for {tx_hash}"))
        })?;
        Ok(Some(self.read_vote(&rtxn, &id)?))
    }

    fn votes_for_election(&self, election: &ElectionId) -> Result<Vec<Vote>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let ids = self.vote_ids_for_election(&rtxn, election)?;
        let mut votes = Vec::with_capacity(ids.len());
        for id in &ids {
            votes.push(self.read_vote(&rtxn, id)?);
        }
        Ok(votes)
    }

    fn election_votes_page(
        &self,
        election: &ElectionId,
        after: Option<&VoteId>,
        limit: usize,
    ) -> Result<Vec<Vote>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let ids = self.vote_ids_page(&rtxn, election, after, limit)?;
        let mut votes = Vec::with_capacity(ids.len());
        for id in &ids {
            votes.push(self.read_vote(&rtxn, id)?);
        }
        Ok(votes)
    }

    fn votes_with_status(&self, status: VerificationStatus) -> Result<Vec<Vote>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let mut votes = Vec::new();
        for entry in self.votes_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (_, bytes) = entry.map_err(LmdbError::from)?;
            let vote: Vote = decode(bytes)?;
            if vote.status == status {
                votes.push(vote);
            }
        }
        Ok(votes)
    }

    fn mark_verified(
        &self,
        id: &VoteId,
        inclusion: &Inclusion,
        at: Timestamp,
    ) -> Result<Transition, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut vote = self.read_vote(&wtxn, id)?;
        if !apply_verified(&mut vote, inclusion, at) {
            return Ok(Transition::Unchanged(vote));
        }
        self.write_vote(&mut wtxn, &vote)?;
        self.adjust_counter(&mut wtxn, &vote.election, true)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(Transition::Applied(vote))
    }

    fn mark_failed(
        &self,
        id: &VoteId,
        reason: &str,
        at: Timestamp,
    ) -> Result<Transition, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut vote = self.read_vote(&wtxn, id)?;
        if !apply_failed(&mut vote, reason, at) {
            return Ok(Transition::Unchanged(vote));
        }
        self.write_vote(&mut wtxn, &vote)?;
        if self.read_slot(&wtxn, &vote.election, &vote.voter)? == Some(SlotEntry::Cast(vote.id)) {
            self.ballot_slots_db
                .delete(&mut wtxn, &slot_key(&vote.election, &vote.voter))
                .map_err(LmdbError::from)?;
        }
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(Transition::Applied(vote))
    }

    fn invalidate_vote(&self, id: &VoteId, at: Timestamp) -> Result<Transition, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut vote = self.read_vote(&wtxn, id)?;
        if !apply_invalidated(&mut vote, at) {
            return Ok(Transition::Unchanged(vote));
        }
        self.write_vote(&mut wtxn, &vote)?;
        self.adjust_counter(&mut wtxn, &vote.election, false)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(Transition::Applied(vote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmdbEnvironment;
    use ballot_types::{
        Ballot, BlockHash, Candidate, CandidateId, ElectionSettings, RequestMetadata,
    };
    use std::sync::Arc;

    fn temp_env() -> (tempfile::TempDir, LmdbEnvironment) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let env = LmdbEnvironment::open(dir.path(), 16, 10 * 1024 * 1024)
            .expect("failed to open env");
        (dir, env)
    }

    fn election(id: &str) -> Election {
        Election {
            id: ElectionId::new(id).unwrap(),
            title: format!("election {id}"),
            description: String::new(),
            start_date: Timestamp::new(100),
            end_date: Timestamp::new(200),
            is_active: true,
            cancelled: false,
            candidates: vec![Candidate {
                id: CandidateId::new("c1").unwrap(),
                name: "Candidate One".into(),
            }],
            total_votes: 0,
            settings: ElectionSettings::default(),
            created_at: Timestamp::new(50),
        }
    }

    fn reservation(voter: &str, election: &str, key: Option<&str>) -> BallotReservation {
        BallotReservation {
            voter: VoterId::new(voter).unwrap(),
            election: ElectionId::new(election).unwrap(),
            idempotency_key: key.map(|k| IdempotencyKey::new(k).unwrap()),
            reserved_at: Timestamp::new(150),
            stale_after_secs: 100,
        }
    }

    fn vote_for(r: &BallotReservation, tx_byte: u8) -> Vote {
        Vote::pending(
            Ballot {
                voter: r.voter.clone(),
                candidate: CandidateId::new("c1").unwrap(),
                election: r.election.clone(),
            },
            TxHash::new([tx_byte; 32]),
            RequestMetadata {
                ip: Some("10.0.0.1".into()),
                user_agent: Some("test".into()),
            },
            r.idempotency_key.clone(),
            r.reserved_at,
        )
    }

    fn inclusion() -> Inclusion {
        Inclusion {
            block_number: 7,
            block_hash: BlockHash::new([7u8; 32]),
            gas_used: Some(50_000),
        }
    }

    #[test]
    fn election_insert_is_unique_and_modify_keeps_counter() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        let e = election("e1");
        store.insert_election(&e).unwrap();
        assert!(matches!(
            store.insert_election(&e),
            Err(StoreError::Duplicate(_))
        ));

        let r = reservation("v1", "e1", None);
        store.reserve_ballot(&r).unwrap();
        let vote = vote_for(&r, 1);
        store.commit_vote(&vote).unwrap();
        store
            .mark_verified(&vote.id, &inclusion(), Timestamp::new(160))
            .unwrap();

        let updated = store
            .modify_election(&e.id, &mut |e: &mut Election| {
                e.cancelled = true;
                e.total_votes = 999;
            })
            .unwrap();
        assert!(updated.cancelled);
        assert_eq!(updated.total_votes, 1);
        assert_eq!(store.get_election(&e.id).unwrap().total_votes, 1);
        assert_eq!(store.list_elections().unwrap().len(), 1);
    }

    #[test]
    fn missing_election_is_not_found() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        let id = ElectionId::new("nope").unwrap();
        assert!(matches!(store.get_election(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.modify_election(&id, &mut |_: &mut Election| {}),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn second_reservation_for_same_slot_is_duplicate() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        let r = reservation("v1", "e1", None);
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Reserved);
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Duplicate);

        store.commit_vote(&vote_for(&r, 1)).unwrap();
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Duplicate);

        // Another election is a different slot.
        let other = reservation("v1", "e2", None);
        assert_eq!(store.reserve_ballot(&other).unwrap(), ReserveOutcome::Reserved);
    }

    #[test]
    fn concurrent_reservations_yield_exactly_one_winner() {
        let (_dir, env) = temp_env();
        let store = Arc::new(env.ballot_store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .reserve_ballot(&reservation("v1", "e1", None))
                        .unwrap()
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = outcomes
            .iter()
            .filter(|o| **o == ReserveOutcome::Reserved)
            .count();
        assert_eq!(winners, 1);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, ReserveOutcome::Reserved | ReserveOutcome::Duplicate)));
    }

    #[test]
    fn idempotency_key_replays_committed_vote() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        let r = reservation("v1", "e1", Some("key-1"));
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Reserved);
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::InFlight);

        let vote = vote_for(&r, 3);
        store.commit_vote(&vote).unwrap();
        assert_eq!(
            store.reserve_ballot(&r).unwrap(),
            ReserveOutcome::Replay(vote.clone())
        );

        let stolen = reservation("v2", "e1", Some("key-1"));
        assert_eq!(
            store.reserve_ballot(&stolen).unwrap(),
            ReserveOutcome::KeyConflict
        );
    }

    #[test]
    fn release_frees_slot_and_in_flight_key_only() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        let r = reservation("v1", "e1", Some("key-2"));
        store.reserve_ballot(&r).unwrap();
        assert!(store
            .release_reservation(&r.voter, &r.election, r.idempotency_key.as_ref())
            .unwrap());
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Reserved);

        let vote = vote_for(&r, 4);
        store.commit_vote(&vote).unwrap();
        assert!(!store
            .release_reservation(&r.voter, &r.election, r.idempotency_key.as_ref())
            .unwrap());
        assert_eq!(store.get_vote(&vote.id).unwrap(), vote);
    }

    #[test]
    fn commit_requires_reservation_and_unique_tx_hash() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        let r1 = reservation("v1", "e1", None);
        assert!(matches!(
            store.commit_vote(&vote_for(&r1, 5)),
            Err(StoreError::Conflict(_))
        ));

        store.reserve_ballot(&r1).unwrap();
        store.commit_vote(&vote_for(&r1, 5)).unwrap();

        let r2 = reservation("v2", "e1", None);
        store.reserve_ballot(&r2).unwrap();
        assert!(matches!(
            store.commit_vote(&vote_for(&r2, 5)),
            Err(StoreError::Duplicate(_))
        ));
        assert!(store.find_vote_by_tx(&TxHash::new([5u8; 32])).unwrap().is_some());
        assert!(store.find_vote_by_tx(&TxHash::new([6u8; 32])).unwrap().is_none());
    }

    #[test]
    fn transitions_move_counter_exactly_once() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        store.insert_election(&election("e1")).unwrap();
        let r = reservation("v1", "e1", None);
        store.reserve_ballot(&r).unwrap();
        let vote = vote_for(&r, 8);
        store.commit_vote(&vote).unwrap();
        let id = ElectionId::new("e1").unwrap();

        assert!(store
            .mark_verified(&vote.id, &inclusion(), Timestamp::new(170))
            .unwrap()
            .applied());
        assert!(!store
            .mark_verified(&vote.id, &inclusion(), Timestamp::new(171))
            .unwrap()
            .applied());
        assert_eq!(store.get_election(&id).unwrap().total_votes, 1);

        let stored = store.get_vote(&vote.id).unwrap();
        assert_eq!(stored.status, VerificationStatus::Verified);
        assert_eq!(stored.block_number, Some(7));

        assert!(store
            .invalidate_vote(&vote.id, Timestamp::new(180))
            .unwrap()
            .applied());
        assert!(!store
            .invalidate_vote(&vote.id, Timestamp::new(181))
            .unwrap()
            .applied());
        assert_eq!(store.get_election(&id).unwrap().total_votes, 0);

        // The invalidated vote still holds the slot.
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Duplicate);
    }

    #[test]
    fn failure_frees_slot_without_touching_counter() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        store.insert_election(&election("e1")).unwrap();
        let r = reservation("v1", "e1", None);
        store.reserve_ballot(&r).unwrap();
        let vote = vote_for(&r, 9);
        store.commit_vote(&vote).unwrap();

        let t = store
            .mark_failed(&vote.id, "reverted", Timestamp::new(175))
            .unwrap();
        assert!(t.applied());
        assert_eq!(t.vote().status, VerificationStatus::Failed);
        assert_eq!(
            store
                .get_election(&ElectionId::new("e1").unwrap())
                .unwrap()
                .total_votes,
            0
        );
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Reserved);
        assert_eq!(
            store.votes_with_status(VerificationStatus::Failed).unwrap().len(),
            1
        );
    }

    #[test]
    fn election_vote_index_is_isolated_per_election() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        for (voter, election, tx) in [("v1", "ab", 1u8), ("v2", "ab", 2), ("v1", "abc", 3)] {
            let r = reservation(voter, election, None);
            store.reserve_ballot(&r).unwrap();
            store.commit_vote(&vote_for(&r, tx)).unwrap();
        }
        assert_eq!(
            store
                .votes_for_election(&ElectionId::new("ab").unwrap())
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            store
                .votes_for_election(&ElectionId::new("abc").unwrap())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn abandoned_reservation_is_taken_over() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        let r = reservation("v1", "e1", Some("key-a"));
        store.reserve_ballot(&r).unwrap();

        let soon = BallotReservation {
            reserved_at: Timestamp::new(200),
            ..r.clone()
        };
        assert_eq!(store.reserve_ballot(&soon).unwrap(), ReserveOutcome::InFlight);

        // Same voter, new key, after the old reservation went stale.
        let later = BallotReservation {
            idempotency_key: Some(IdempotencyKey::new("key-b").unwrap()),
            reserved_at: Timestamp::new(250),
            ..r.clone()
        };
        assert_eq!(store.reserve_ballot(&later).unwrap(), ReserveOutcome::Reserved);
        assert_eq!(
            store
                .idempotency_entry(&IdempotencyKey::new("key-a").unwrap())
                .unwrap(),
            None
        );
        assert_eq!(store.reserve_ballot(&later).unwrap(), ReserveOutcome::InFlight);

        // A committed vote is never taken over.
        store.commit_vote(&vote_for(&later, 1)).unwrap();
        let much_later = BallotReservation {
            idempotency_key: None,
            reserved_at: Timestamp::new(10_000),
            ..r
        };
        assert_eq!(
            store.reserve_ballot(&much_later).unwrap(),
            ReserveOutcome::Duplicate
        );
    }

    #[test]
    fn stashed_submission_holds_slot_until_committed() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        store.insert_election(&election("e1")).unwrap();
        let r = reservation("v1", "e1", Some("key-s"));
        store.reserve_ballot(&r).unwrap();
        let vote = vote_for(&r, 11);

        store.stash_submission(&vote).unwrap();
        assert_eq!(store.stashed_submissions().unwrap(), vec![vote.clone()]);
        assert!(!store
            .release_reservation(&r.voter, &r.election, r.idempotency_key.as_ref())
            .unwrap());

        // Neither the slot nor the key frees up, however long it waits.
        let later = BallotReservation {
            reserved_at: Timestamp::new(100_000),
            ..r.clone()
        };
        assert_eq!(store.reserve_ballot(&later).unwrap(), ReserveOutcome::InFlight);
        let keyless = BallotReservation {
            idempotency_key: None,
            ..later
        };
        assert_eq!(store.reserve_ballot(&keyless).unwrap(), ReserveOutcome::Duplicate);

        store.commit_vote(&vote).unwrap();
        assert!(store.stashed_submissions().unwrap().is_empty());
        assert_eq!(store.reserve_ballot(&r).unwrap(), ReserveOutcome::Replay(vote.clone()));
        assert_eq!(store.find_vote_by_tx(&vote.tx_hash).unwrap(), Some(vote));
    }

    #[test]
    fn election_votes_page_walks_in_id_order() {
        let (_dir, env) = temp_env();
        let store = env.ballot_store();
        for (i, voter) in ["v1", "v2", "v3", "v4", "v5"].iter().enumerate() {
            let r = reservation(voter, "ab", None);
            store.reserve_ballot(&r).unwrap();
            store.commit_vote(&vote_for(&r, i as u8 + 1)).unwrap();
        }
        let r = reservation("v1", "abc", None);
        store.reserve_ballot(&r).unwrap();
        store.commit_vote(&vote_for(&r, 99)).unwrap();

        let election = ElectionId::new("ab").unwrap();
        let all: Vec<VoteId> = store
            .votes_for_election(&election)
            .unwrap()
            .iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(all.len(), 5);

        let first = store.election_votes_page(&election, None, 2).unwrap();
        assert_eq!(first.iter().map(|v| v.id).collect::<Vec<_>>(), all[..2]);
        let second = store
            .election_votes_page(&election, Some(&first[1].id), 2)
            .unwrap();
        assert_eq!(second.iter().map(|v| v.id).collect::<Vec<_>>(), all[2..4]);
        let last = store
            .election_votes_page(&election, Some(&second[1].id), 2)
            .unwrap();
        assert_eq!(last.iter().map(|v| v.id).collect::<Vec<_>>(), all[4..]);
        assert!(store
            .election_votes_page(&election, Some(&all[4]), 2)
            .unwrap()
            .is_empty());
    }
}
