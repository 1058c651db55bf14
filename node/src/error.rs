use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] ballot_store::StoreError),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] ballot_store_lmdb::LmdbError),

    #[error("database integrity check failed: {0}")]
    Integrity(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] ballot_ledger::LedgerError),

    #[error("reconciler error: {0}")]
    Reconcile(#[from] ballot_reconciler::ReconcileError),

    #[error("notifier error: {0}")]
    Notify(#[from] ballot_reconciler::NotifyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node already started")]
    AlreadyStarted,
}
