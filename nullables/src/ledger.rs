//! Nullable ledger — a scriptable in-memory chain.
//!
//! Transactions land in a pool on submit and move into a block when the test
//! calls [`NullLedger::mine_block`]. Tests can revert or drop pooled
//! transactions, rewrite history with [`NullLedger::reorg`], and inject
//! submission or query failures. Like the voting contract, the chain refuses
//! a second ballot from a voter in the same election while the first is
//! pooled or successfully mined.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ballot_ledger::{Ledger, LedgerError, TxStatus};
use ballot_types::{Ballot, BlockHash, Inclusion, TxHash};

const GAS_PER_VOTE: u64 = 52_000;

/// Failure injected into the next ledger call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Transport,
    Rejected,
}

impl FailureKind {
    fn into_error(self) -> LedgerError {
        match self {
            Self::Timeout => LedgerError::Timeout,
            Self::Transport => LedgerError::Transport("connection reset by null ledger".into()),
            Self::Rejected => LedgerError::Rejected("rejected by null ledger".into()),
        }
    }
}

#[derive(Clone, Debug)]
struct ChainTx {
    hash: TxHash,
    ballot: Ballot,
    reverts: bool,
}

#[derive(Clone, Debug)]
struct ChainBlock {
    hash: BlockHash,
    txs: Vec<ChainTx>,
}

#[derive(Debug)]
struct Chain {
    /// Index is the block number; block 0 is genesis.
    blocks: Vec<ChainBlock>,
    pool: Vec<ChainTx>,
    /// Bumped on every reorg so replacement blocks get fresh hashes.
    fork: u64,
    next_tx: u64,
    submit_failures: VecDeque<FailureKind>,
    status_failures: VecDeque<FailureKind>,
    submit_delay: Option<Duration>,
}

impl Chain {
    fn block_hash_for(fork: u64, number: u64) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xb1;
        bytes[8..16].copy_from_slice(&fork.to_be_bytes());
        bytes[24..32].copy_from_slice(&number.to_be_bytes());
        BlockHash::new(bytes)
    }

    fn has_live_ballot(&self, ballot: &Ballot) -> bool {
        let same = |tx: &ChainTx| {
            tx.ballot.voter == ballot.voter && tx.ballot.election == ballot.election
        };
        self.pool.iter().any(same)
            || self
                .blocks
                .iter()
                .flat_map(|b| b.txs.iter())
                .any(|tx| same(tx) && !tx.reverts)
    }
}

/// A deterministic ledger for testing.
pub struct NullLedger {
    chain: Mutex<Chain>,
    submissions: AtomicUsize,
}

impl NullLedger {
    pub fn new() -> Self {
        Self {
            chain: Mutex::new(Chain {
                blocks: vec![ChainBlock {
                    hash: Chain::block_hash_for(0, 0),
                    txs: Vec::new(),
                }],
                pool: Vec::new(),
                fork: 0,
                next_tx: 1,
                submit_failures: VecDeque::new(),
                status_failures: VecDeque::new(),
                submit_delay: None,
            }),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Number of `submit_ballot` calls that reached the ledger, failed or not.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Fail the next `n` submissions with `kind`.
    pub fn fail_next_submissions(&self, n: usize, kind: FailureKind) {
        let mut chain = self.chain.lock().unwrap();
        chain.submit_failures.extend(std::iter::repeat(kind).take(n));
    }

    /// Fail the next `n` status queries with `kind`.
    pub fn fail_next_status_queries(&self, n: usize, kind: FailureKind) {
        let mut chain = self.chain.lock().unwrap();
        chain.status_failures.extend(std::iter::repeat(kind).take(n));
    }

    /// Make every submission wait `delay` before answering.
    pub fn set_submit_delay(&self, delay: Option<Duration>) {
        self.chain.lock().unwrap().submit_delay = delay;
    }

    /// Hashes currently waiting in the pool.
    pub fn pooled(&self) -> Vec<TxHash> {
        self.chain.lock().unwrap().pool.iter().map(|tx| tx.hash).collect()
    }

    /// Execute the pooled transaction `hash` as a revert when it is mined.
    pub fn revert_on_inclusion(&self, hash: &TxHash) -> bool {
        let mut chain = self.chain.lock().unwrap();
        match chain.pool.iter_mut().find(|tx| &tx.hash == hash) {
            Some(tx) => {
                tx.reverts = true;
                true
            }
            None => false,
        }
    }

    /// Evict `hash` from the pool without mining it.
    pub fn drop_transaction(&self, hash: &TxHash) -> bool {
        let mut chain = self.chain.lock().unwrap();
        let before = chain.pool.len();
        chain.pool.retain(|tx| &tx.hash != hash);
        chain.pool.len() != before
    }

    /// Mine one block holding the whole pool. Returns its number.
    pub fn mine_block(&self) -> u64 {
        let mut chain = self.chain.lock().unwrap();
        let number = chain.blocks.len() as u64;
        let txs = std::mem::take(&mut chain.pool);
        let hash = Chain::block_hash_for(chain.fork, number);
        chain.blocks.push(ChainBlock { hash, txs });
        number
    }

    /// Mine `n` blocks; the first takes the pool, the rest are empty.
    pub fn mine_blocks(&self, n: u64) -> u64 {
        let mut head = self.head();
        for _ in 0..n {
            head = self.mine_block();
        }
        head
    }

    pub fn head(&self) -> u64 {
        self.chain.lock().unwrap().blocks.len() as u64 - 1
    }

    /// Replace every block from `height` upwards with empty blocks on a new
    /// fork, keeping the head height. Transactions in the orphaned blocks are
    /// forgotten. Returns the orphaned transaction hashes.
    pub fn reorg(&self, height: u64) -> Vec<TxHash> {
        self.rewrite_from(height, false)
    }

    /// Like [`reorg`](Self::reorg) but orphaned transactions go back into the
    /// pool and can be mined again on the new fork.
    pub fn reorg_and_requeue(&self, height: u64) -> Vec<TxHash> {
        self.rewrite_from(height, true)
    }

    fn rewrite_from(&self, height: u64, requeue: bool) -> Vec<TxHash> {
        let mut chain = self.chain.lock().unwrap();
        let height = height.max(1) as usize;
        if height >= chain.blocks.len() {
            return Vec::new();
        }
        let head = chain.blocks.len();
        let orphaned: Vec<ChainTx> = chain
            .blocks
            .drain(height..)
            .flat_map(|block| block.txs)
            .collect();
        chain.fork += 1;
        for number in height..head {
            let hash = Chain::block_hash_for(chain.fork, number as u64);
            chain.blocks.push(ChainBlock {
                hash,
                txs: Vec::new(),
            });
        }
        let hashes = orphaned.iter().map(|tx| tx.hash).collect();
        if requeue {
            chain.pool.extend(orphaned);
        }
        hashes
    }
}

impl Default for NullLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for NullLedger {
    async fn submit_ballot(&self, ballot: &Ballot) -> Result<TxHash, LedgerError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let delay = self.chain.lock().unwrap().submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut chain = self.chain.lock().unwrap();
        if let Some(kind) = chain.submit_failures.pop_front() {
            return Err(kind.into_error());
        }
        if chain.has_live_ballot(ballot) {
            return Err(LedgerError::Rejected(
                "execution reverted: voter already cast a ballot".into(),
            ));
        }
        let mut bytes = [0u8; 32];
        bytes[0] = 0x7a;
        bytes[24..32].copy_from_slice(&chain.next_tx.to_be_bytes());
        chain.next_tx += 1;
        let hash = TxHash::new(bytes);
        chain.pool.push(ChainTx {
            hash,
            ballot: ballot.clone(),
            reverts: false,
        });
        Ok(hash)
    }

    async fn transaction_status(&self, tx_hash: &TxHash) -> Result<TxStatus, LedgerError> {
        let mut chain = self.chain.lock().unwrap();
        if let Some(kind) = chain.status_failures.pop_front() {
            return Err(kind.into_error());
        }
        if chain.pool.iter().any(|tx| &tx.hash == tx_hash) {
            return Ok(TxStatus::Pending);
        }
        for (number, block) in chain.blocks.iter().enumerate() {
            if let Some(tx) = block.txs.iter().find(|tx| &tx.hash == tx_hash) {
                let inclusion = Inclusion {
                    block_number: number as u64,
                    block_hash: block.hash,
                    gas_used: Some(GAS_PER_VOTE),
                };
                return Ok(if tx.reverts {
                    TxStatus::Reverted(inclusion)
                } else {
                    TxStatus::Mined(inclusion)
                });
            }
        }
        Ok(TxStatus::Unknown)
    }

    async fn head_block(&self) -> Result<u64, LedgerError> {
        Ok(self.head())
    }

    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>, LedgerError> {
        let chain = self.chain.lock().unwrap();
        Ok(chain.blocks.get(number as usize).map(|b| b.hash))
    }
}
