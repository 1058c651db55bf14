//! Abstract storage traits for the ballot ledger reconciler.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the codebase depends only on the traits.
//!
//! Backends must make each trait method a single atomic step: the
//! reconciler's uniqueness and counter guarantees rest on that.

pub mod election;
pub mod error;
pub mod meta;
pub mod transition;
pub mod vote;

pub use election::ElectionStore;
pub use error::StoreError;
pub use meta::MetaStore;
pub use vote::{
    BallotReservation, IdempotencyEntry, ReserveOutcome, SlotEntry, Transition, VoteStore,
};

/// Everything the reconciler needs from a backend.
pub trait BallotStore: ElectionStore + VoteStore + Send + Sync {}

impl<T> BallotStore for T where T: ElectionStore + VoteStore + Send + Sync {}
