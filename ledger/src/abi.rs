//! Calldata and quantity encoding for the voting contract.
//!
//! The contract exposes `castVote(bytes32 electionId, bytes32 candidateId,
//! bytes32 voterId)`. Off-chain ids are arbitrary strings, so each is mapped
//! to a `bytes32` word with Blake2b-256. The 4-byte function selector comes
//! from configuration because it is fixed by the deployed contract.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use ballot_types::Ballot;

use crate::LedgerError;

type Blake2b256 = Blake2b<U32>;

/// Map an off-chain identifier to the contract's `bytes32` key.
pub fn id_word(id: &str) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(id.as_bytes());
    let mut word = [0u8; 32];
    word.copy_from_slice(&hasher.finalize());
    word
}

/// ABI-encode a `castVote` call for `ballot`.
pub fn encode_cast_vote(selector: [u8; 4], ballot: &Ballot) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 3 * 32);
    data.extend_from_slice(&selector);
    data.extend_from_slice(&id_word(ballot.election.as_str()));
    data.extend_from_slice(&id_word(ballot.candidate.as_str()));
    data.extend_from_slice(&id_word(ballot.voter.as_str()));
    data
}

/// Parse a 4-byte selector written as hex (`0x` optional).
pub fn parse_selector(s: &str) -> Result<[u8; 4], LedgerError> {
    let mut out = [0u8; 4];
    hex::decode_to_slice(s.strip_prefix("0x").unwrap_or(s), &mut out)
        .map_err(|e| LedgerError::Malformed(format!("function selector {s}: {e}")))?;
    Ok(out)
}

/// `0x`-prefixed hex for raw bytes.
pub fn hex_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// JSON-RPC quantity encoding: `0x` followed by hex without leading zeros.
pub fn encode_quantity(n: u64) -> String {
    format!("{n:#x}")
}

pub fn decode_quantity(s: &str) -> Result<u64, LedgerError> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::Malformed(format!("quantity without 0x prefix: {s}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::Malformed(format!("quantity {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_types::{CandidateId, ElectionId, VoterId};

    #[test]
    fn cast_vote_layout() {
        let ballot = Ballot {
            voter: VoterId::new("v").unwrap(),
            candidate: CandidateId::new("c").unwrap(),
            election: ElectionId::new("e").unwrap(),
        };
        let data = encode_cast_vote([0xde, 0xad, 0xbe, 0xef], &ballot);
        assert_eq!(data.len(), 100);
        assert_eq!(&data[..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&data[4..36], &id_word("e"));
        assert_eq!(&data[36..68], &id_word("c"));
        assert_eq!(&data[68..100], &id_word("v"));
    }

    #[test]
    fn quantities() {
        assert_eq!(encode_quantity(0), "0x0");
        assert_eq!(encode_quantity(255), "0xff");
        assert_eq!(decode_quantity("0x1b4").unwrap(), 436);
        assert!(decode_quantity("1b4").is_err());
        assert!(decode_quantity("0xzz").is_err());
    }

    #[test]
    fn selector_parsing() {
        assert_eq!(parse_selector("0x40b08881").unwrap(), [0x40, 0xb0, 0x88, 0x81]);
        assert_eq!(parse_selector("40b08881").unwrap(), [0x40, 0xb0, 0x88, 0x81]);
        assert!(parse_selector("0x40b0").is_err());
    }
}
