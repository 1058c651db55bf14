//! Ledger hash types for transactions and blocks.
//!
//! Both are 32-byte values rendered as `0x`-prefixed lowercase hex, which is
//! how the ledger's JSON-RPC interface reports them.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{hex_serde, TypeError};

macro_rules! ledger_hash {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            /// Parse from hex, with or without a `0x` prefix.
            pub fn from_hex(s: &str) -> Result<Self, TypeError> {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(digits, &mut bytes)
                    .map_err(|e| TypeError::InvalidHash(format!("{s}: {e}")))?;
                Ok(Self(bytes))
            }

            /// Build from a byte slice that must be exactly 32 bytes long.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; 32]>::try_from(bytes).ok().map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..4]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                hex_serde::serialize(&self.0, || self.to_string(), serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                hex_serde::deserialize(deserializer, Self::from_hex, Self)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }
    };
}

ledger_hash! {
    /// Hash of a ledger transaction carrying a ballot.
    TxHash
}

ledger_hash! {
    /// Hash of a ledger block.
    BlockHash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_prefixed_hex() {
        let hash = TxHash::new([0xab; 32]);
        let s = hash.to_string();
        assert!(s.starts_with("0xabab"));
        assert_eq!(s.len(), 66);
    }

    #[test]
    fn parses_with_and_without_prefix() {
        let hash = BlockHash::new([7u8; 32]);
        let with = BlockHash::from_hex(&hash.to_string()).unwrap();
        let without = BlockHash::from_hex(&hex::encode([7u8; 32])).unwrap();
        assert_eq!(with, hash);
        assert_eq!(without, hash);
    }

    #[test]
    fn rejects_short_hex() {
        assert!(TxHash::from_hex("0x1234").is_err());
        assert!(TxHash::from_hex("not-hex").is_err());
    }

    #[test]
    fn json_uses_hex_and_bincode_uses_bytes() {
        let hash = TxHash::new([0x0f; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        assert_eq!(serde_json::from_str::<TxHash>(&json).unwrap(), hash);

        let bytes = bincode::serialize(&hash).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bincode::deserialize::<TxHash>(&bytes).unwrap(), hash);
    }

    #[test]
    fn from_slice_requires_32_bytes() {
        assert!(TxHash::from_slice(&[1u8; 31]).is_none());
        assert_eq!(TxHash::from_slice(&[1u8; 32]), Some(TxHash::new([1u8; 32])));
    }
}
