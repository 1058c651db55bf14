//! Composite key layouts.
//!
//! Election ids are length-prefixed (`u16` big-endian) so that a prefix scan
//! over one election can never match another whose id merely starts with the
//! same characters.

use ballot_types::{ElectionId, VoteId, VoterId};

/// `len(election) ++ election`: the prefix shared by every per-election key.
pub fn election_prefix(election: &ElectionId) -> Vec<u8> {
    let bytes = election.as_str().as_bytes();
    let mut key = Vec::with_capacity(2 + bytes.len() + 32);
    key.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    key.extend_from_slice(bytes);
    key
}

/// Ballot slot key: `len(election) ++ election ++ voter`.
pub fn slot_key(election: &ElectionId, voter: &VoterId) -> Vec<u8> {
    let mut key = election_prefix(election);
    key.extend_from_slice(voter.as_str().as_bytes());
    key
}

/// Per-election vote index key: `len(election) ++ election ++ vote_id`.
pub fn election_vote_key(election: &ElectionId, vote: &VoteId) -> Vec<u8> {
    let mut key = election_prefix(election);
    key.extend_from_slice(vote.as_bytes());
    key
}

/// Increment a byte-string prefix to produce an exclusive upper bound for
/// range scans. Returns `false` if the prefix is all `0xFF` (no upper bound).
pub fn increment_prefix(prefix: &mut Vec<u8>) -> bool {
    while let Some(last) = prefix.pop() {
        if last < 0xFF {
            prefix.push(last + 1);
            return true;
        }
    }
    false
}
