//! Fundamental types for the ballot ledger reconciler.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! identifiers, ledger hashes, timestamps, elections, votes and the ballot
//! payload submitted on-chain.

pub mod election;
pub mod error;
pub mod hash;
mod hex_serde;
pub mod ids;
pub mod time;
pub mod vote;

pub use election::{Candidate, Election, ElectionSettings, ElectionStatus};
pub use error::TypeError;
pub use hash::{BlockHash, TxHash};
pub use ids::{CandidateId, ElectionId, IdempotencyKey, VoteId, VoterId};
pub use time::{Clock, SystemClock, Timestamp};
pub use vote::{Ballot, Inclusion, RequestMetadata, VerificationStatus, Vote};
