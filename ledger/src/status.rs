//! Transaction status as seen from the canonical chain.

use ballot_types::Inclusion;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Known to the node but not yet in a block.
    Pending,
    /// Included and executed successfully.
    Mined(Inclusion),
    /// Included but execution reverted.
    Reverted(Inclusion),
    /// Not known to the node: never seen, dropped from the pool, or orphaned
    /// by a reorganization.
    Unknown,
}

impl TxStatus {
    pub fn inclusion(&self) -> Option<&Inclusion> {
        match self {
            Self::Mined(inclusion) | Self::Reverted(inclusion) => Some(inclusion),
            Self::Pending | Self::Unknown => None,
        }
    }
}
