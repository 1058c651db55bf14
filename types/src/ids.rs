//! Identifiers for voters, candidates, elections, votes and idempotency keys.
//!
//! Voter, candidate and election ids are opaque strings issued by the
//! surrounding application (for example document ids). They are validated on
//! construction so every backend can embed them in composite keys.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::{hex_serde, TxHash, TypeError};

type Blake2b256 = Blake2b<U32>;

/// Longest accepted textual identifier, in bytes.
pub const MAX_ID_LEN: usize = 128;

fn validate(kind: &'static str, raw: &str) -> Result<(), TypeError> {
    if raw.is_empty() {
        return Err(TypeError::EmptyId { kind });
    }
    if raw.len() > MAX_ID_LEN {
        return Err(TypeError::IdTooLong {
            kind,
            max: MAX_ID_LEN,
        });
    }
    if raw.chars().any(char::is_control) {
        return Err(TypeError::InvalidIdCharacters { kind });
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a validated identifier.
            pub fn new(raw: impl Into<String>) -> Result<Self, TypeError> {
                let raw = raw.into();
                validate($kind, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = TypeError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::new(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = TypeError;

            fn try_from(raw: &str) -> Result<Self, Self::Error> {
                Self::new(raw)
            }
        }
    };
}

string_id! {
    /// The voter casting a ballot.
    VoterId, "voter id"
}

string_id! {
    /// A candidate registered to an election.
    CandidateId, "candidate id"
}

string_id! {
    /// An election.
    ElectionId, "election id"
}

string_id! {
    /// Caller-supplied token that makes a vote submission safe to retry.
    IdempotencyKey, "idempotency key"
}

/// Identity of a stored vote.
///
/// Derived from the election, the voter and the transaction hash, so the same
/// on-chain transaction always maps to the same vote id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoteId([u8; 32]);

impl VoteId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn derive(election: &ElectionId, voter: &VoterId, tx_hash: &TxHash) -> Self {
        let mut hasher = Blake2b256::new();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        hasher.update((election.as_str().len() as u32).to_be_bytes());
        hasher.update(election.as_str().as_bytes());
        hasher.update((voter.as_str().len() as u32).to_be_bytes());
        hasher.update(voter.as_str().as_bytes());
        hasher.update(tx_hash.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| TypeError::InvalidHash(format!("{s}: {e}")))?;
        Ok(Self(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }
}

impl Serialize for VoteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        hex_serde::serialize(&self.0, || self.to_string(), serializer)
    }
}

impl<'de> Deserialize<'de> for VoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        hex_serde::deserialize(deserializer, Self::from_hex, Self)
    }
}

impl fmt::Debug for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoteId({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
