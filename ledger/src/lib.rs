//! The ledger collaborator.
//!
//! The reconciler talks to the chain only through the [`Ledger`] trait:
//! submit a ballot transaction, ask where a transaction stands, read the
//! chain head and the canonical hash of a block. [`JsonRpcLedger`] implements
//! it against an Ethereum-style JSON-RPC node hosting the voting contract.

pub mod abi;
pub mod error;
pub mod jsonrpc;
pub mod status;

pub use error::LedgerError;
pub use jsonrpc::{JsonRpcLedger, JsonRpcLedgerConfig};
pub use status::TxStatus;

use async_trait::async_trait;
use ballot_types::{Ballot, BlockHash, TxHash};

/// Access to the append-only chain that records ballots.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Submit a ballot transaction. Returns once the node accepted it into
    /// its pending pool.
    async fn submit_ballot(&self, ballot: &Ballot) -> Result<TxHash, LedgerError>;

    /// Where a transaction currently stands on the canonical chain.
    async fn transaction_status(&self, tx_hash: &TxHash) -> Result<TxStatus, LedgerError>;

    /// Number of the current chain head.
    async fn head_block(&self) -> Result<u64, LedgerError>;

    /// Hash of the canonical block at `number`, if the chain is that long.
    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>, LedgerError>;
}

/// Confirmations a block at `block_number` has when the head is at `head`.
/// The including block itself counts as the first confirmation.
pub fn confirmations(head: u64, block_number: u64) -> u64 {
    if head < block_number {
        0
    } else {
        head - block_number + 1
    }
}
