//! Elections, their candidates and derived status.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CandidateId, ElectionId, Timestamp, TypeError};

/// A candidate registered to an election.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
}

/// Per-election settings.
///
/// `allow_multiple_votes` is recorded for the surrounding application but does
/// not relax the one-live-vote-per-voter rule of the reconciler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSettings {
    pub allow_multiple_votes: bool,
    pub require_verification: bool,
    pub public_results: bool,
}

/// Status derived from the time window, the activation flag and cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionStatus {
    Upcoming,
    Active,
    Completed,
    Cancelled,
}

impl ElectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ElectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An election with a half-open voting window `[start_date, end_date)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    pub id: ElectionId,
    pub title: String,
    pub description: String,
    pub start_date: Timestamp,
    pub end_date: Timestamp,
    pub is_active: bool,
    pub cancelled: bool,
    pub candidates: Vec<Candidate>,
    /// Verified, valid votes. Maintained by the store's atomic counter; the
    /// value carried here is only a snapshot taken when the record was read.
    pub total_votes: u64,
    pub settings: ElectionSettings,
    pub created_at: Timestamp,
}

impl Election {
    /// Check the structural invariants: a non-empty window and a non-empty,
    /// duplicate-free candidate list.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.start_date >= self.end_date {
            return Err(TypeError::EmptyWindow {
                start: self.start_date.as_secs(),
                end: self.end_date.as_secs(),
            });
        }
        if self.candidates.is_empty() {
            return Err(TypeError::NoCandidates);
        }
        for (i, candidate) in self.candidates.iter().enumerate() {
            if self.candidates[..i].iter().any(|c| c.id == candidate.id) {
                return Err(TypeError::DuplicateCandidate(candidate.id.to_string()));
            }
        }
        Ok(())
    }

    pub fn status(&self, now: Timestamp) -> ElectionStatus {
        if self.cancelled {
            ElectionStatus::Cancelled
        } else if now >= self.end_date {
            ElectionStatus::Completed
        } else if now < self.start_date || !self.is_active {
            ElectionStatus::Upcoming
        } else {
            ElectionStatus::Active
        }
    }

    /// Whether ballots are accepted at `now`.
    pub fn is_open(&self, now: Timestamp) -> bool {
        self.status(now) == ElectionStatus::Active
    }

    pub fn candidate(&self, id: &CandidateId) -> Option<&Candidate> {
        self.candidates.iter().find(|c| &c.id == id)
    }
}
