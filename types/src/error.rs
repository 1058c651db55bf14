//! Validation errors for the fundamental types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("{kind} must not be empty")]
    EmptyId { kind: &'static str },

    #[error("{kind} is longer than {max} bytes")]
    IdTooLong { kind: &'static str, max: usize },

    #[error("{kind} contains control characters")]
    InvalidIdCharacters { kind: &'static str },

    #[error("invalid hex hash: {0}")]
    InvalidHash(String),

    #[error("election window is empty: start {start} is not before end {end}")]
    EmptyWindow { start: u64, end: u64 },

    #[error("election has no candidates")]
    NoCandidates,

    #[error("candidate {0} is listed twice")]
    DuplicateCandidate(String),
}
