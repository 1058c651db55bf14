//! Serde support for 32-byte identifiers.
//!
//! Human-readable formats (JSON, TOML) get the type's hex string; binary
//! formats (bincode in LMDB) get the raw bytes.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub(crate) fn serialize<S: Serializer>(
    bytes: &[u8; 32],
    text: impl FnOnce() -> String,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.serialize_str(&text())
    } else {
        bytes.serialize(serializer)
    }
}

pub(crate) fn deserialize<'de, D, T, E>(
    deserializer: D,
    parse: impl FnOnce(&str) -> Result<T, E>,
    from_bytes: impl FnOnce([u8; 32]) -> T,
) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    E: std::fmt::Display,
{
    if deserializer.is_human_readable() {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(D::Error::custom)
    } else {
        <[u8; 32]>::deserialize(deserializer).map(from_bytes)
    }
}
