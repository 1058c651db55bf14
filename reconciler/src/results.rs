//! Election results and tally verification.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use ballot_types::{CandidateId, ElectionId, ElectionStatus, VerificationStatus, Vote, VoteId};

use crate::{ReconcileError, VoteReconciler};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate: CandidateId,
    pub name: String,
    pub votes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election: ElectionId,
    pub title: String,
    pub status: ElectionStatus,
    pub total_votes: u64,
    pub pending_votes: u64,
    /// Per-candidate counts of verified, valid votes. Withheld until the
    /// election completes unless its results are public.
    pub tallies: Option<Vec<CandidateTally>>,
}

/// Stored counter against a recount of verified, valid votes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyReport {
    pub election: ElectionId,
    pub recorded: u64,
    pub counted: u64,
    pub drift: i64,
}

impl TallyReport {
    pub fn is_consistent(&self) -> bool {
        self.drift == 0
    }
}

impl VoteReconciler {
    pub fn election_results(&self, id: &ElectionId) -> Result<ElectionResults, ReconcileError> {
        let election = self.get_election(id)?;
        let status = election.status(self.clock.now());
        let votes = self.store.votes_for_election(id)?;

        let pending_votes = votes
            .iter()
            .filter(|v| v.status == VerificationStatus::Pending)
            .count() as u64;

        let visible = election.settings.public_results || status == ElectionStatus::Completed;
        let tallies = visible.then(|| {
            let mut counts: HashMap<&CandidateId, u64> = HashMap::new();
            for vote in votes.iter().filter(|v| v.is_counted()) {
                *counts.entry(&vote.candidate).or_default() += 1;
            }
            election
                .candidates
                .iter()
                .map(|c| CandidateTally {
                    candidate: c.id.clone(),
                    name: c.name.clone(),
                    votes: counts.get(&c.id).copied().unwrap_or(0),
                })
                .collect()
        });

        Ok(ElectionResults {
            election: election.id,
            title: election.title,
            status,
            total_votes: election.total_votes,
            pending_votes,
            tallies,
        })
    }

    /// Recount verified, valid votes and compare with the stored counter.
    pub fn verify_tally(&self, id: &ElectionId) -> Result<TallyReport, ReconcileError> {
        let election = self.get_election(id)?;
        let counted = self
            .store
            .votes_for_election(id)?
            .iter()
            .filter(|v| v.is_counted())
            .count() as u64;
        let report = TallyReport {
            election: election.id,
            recorded: election.total_votes,
            counted,
            drift: election.total_votes as i64 - counted as i64,
        };
        if !report.is_consistent() {
            warn!(
                election = %report.election,
                recorded = report.recorded,
                counted = report.counted,
                "vote counter drifted from recount"
            );
        }
        Ok(report)
    }

    /// One page of an election's votes in vote-id order, starting after
    /// `after`.
    pub fn election_votes(
        &self,
        id: &ElectionId,
        after: Option<&VoteId>,
        limit: usize,
    ) -> Result<Vec<Vote>, ReconcileError> {
        self.get_election(id)?;
        Ok(self.store.election_votes_page(id, after, limit)?)
    }
}
