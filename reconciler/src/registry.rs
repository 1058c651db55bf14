//! Election registry operations.

use serde::{Deserialize, Serialize};
use tracing::info;

use ballot_store::StoreError;
use ballot_types::{Candidate, Election, ElectionId, ElectionSettings, Timestamp};

use crate::reconciler::not_found_as;
use crate::{ReconcileError, VoteReconciler};

/// Everything needed to register an election.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewElection {
    pub id: ElectionId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: Timestamp,
    pub end_date: Timestamp,
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub settings: ElectionSettings,
    /// Activate immediately; otherwise the election stays `upcoming` until
    /// [`VoteReconciler::set_active`] is called.
    #[serde(default)]
    pub is_active: bool,
}

impl VoteReconciler {
    pub fn create_election(&self, new: NewElection) -> Result<Election, ReconcileError> {
        let election = Election {
            id: new.id,
            title: new.title,
            description: new.description,
            start_date: new.start_date,
            end_date: new.end_date,
            is_active: new.is_active,
            cancelled: false,
            candidates: new.candidates,
            total_votes: 0,
            settings: new.settings,
            created_at: self.clock.now(),
        };
        election.validate()?;

        match self.store.insert_election(&election) {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(ReconcileError::ElectionExists {
                    election: election.id,
                })
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            election = %election.id,
            candidates = election.candidates.len(),
            start = election.start_date.as_secs(),
            end = election.end_date.as_secs(),
            "election created"
        );
        Ok(election)
    }

    pub fn get_election(&self, id: &ElectionId) -> Result<Election, ReconcileError> {
        self.store
            .get_election(id)
            .map_err(|e| not_found_as(e, || ReconcileError::ElectionNotFound(id.clone())))
    }

    pub fn list_elections(&self) -> Result<Vec<Election>, ReconcileError> {
        Ok(self.store.list_elections()?)
    }

    /// Open (or pause) voting inside the election's window.
    pub fn set_active(&self, id: &ElectionId, active: bool) -> Result<Election, ReconcileError> {
        let election = self
            .store
            .modify_election(id, &mut |e: &mut Election| e.is_active = active)
            .map_err(|e| not_found_as(e, || ReconcileError::ElectionNotFound(id.clone())))?;
        info!(election = %id, active, "election activation changed");
        Ok(election)
    }

    /// Stop an election for good. Recorded votes are kept.
    pub fn cancel_election(&self, id: &ElectionId) -> Result<Election, ReconcileError> {
        let election = self
            .store
            .modify_election(id, &mut |e: &mut Election| {
                e.cancelled = true;
                e.is_active = false;
            })
            .map_err(|e| not_found_as(e, || ReconcileError::ElectionNotFound(id.clone())))?;
        info!(election = %id, "election cancelled");
        Ok(election)
    }
}
