//! Election storage trait.

use crate::StoreError;
use ballot_types::{Election, ElectionId};

/// Trait for storing elections and their vote counters.
///
/// The `total_votes` counter is kept apart from the election record: writing
/// an election never changes it, and reads fill `Election::total_votes` from
/// the counter. Only [`VoteStore`](crate::VoteStore) transitions move it.
pub trait ElectionStore {
    /// Insert a new election with a zero counter. Fails with
    /// [`StoreError::Duplicate`] if the id is taken.
    fn insert_election(&self, election: &Election) -> Result<(), StoreError>;

    /// Apply `edit` to the stored election inside one write transaction and
    /// return the result. The id and counter cannot be changed this way.
    fn modify_election(
        &self,
        id: &ElectionId,
        edit: &mut dyn FnMut(&mut Election),
    ) -> Result<Election, StoreError>;

    fn get_election(&self, id: &ElectionId) -> Result<Election, StoreError>;

    fn list_elections(&self) -> Result<Vec<Election>, StoreError>;
}
