use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger request timed out")]
    Timeout,

    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("ballot rejected by the ledger: {0}")]
    Rejected(String),

    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

impl LedgerError {
    /// Whether retrying the same request may succeed.
    ///
    /// JSON-RPC server errors (`-32000..=-32099`) and internal errors
    /// (`-32603`) count as transient; bad requests, reverts and rejections
    /// do not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Rpc { code, .. } => *code == -32603 || (-32099..=-32000).contains(code),
            Self::Rejected(_) | Self::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
