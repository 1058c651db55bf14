//! Keyset pagination for vote listings.
//!
//! Votes are listed in vote-id order; the cursor is the id of the last vote
//! on the previous page, so concurrent inserts never shift a page.

use serde::{Deserialize, Serialize};

use ballot_types::VoteId;

use crate::RpcError;

/// Default page size when `limit` is not specified.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Maximum allowed page size.
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    /// Id of the last vote seen.
    pub after: Option<String>,
    pub limit: Option<u32>,
}

impl PageParams {
    /// Effective page size, clamped to [1, MAX_PAGE_SIZE].
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn after(&self) -> Result<Option<VoteId>, RpcError> {
        self.after
            .as_deref()
            .map(|s| VoteId::from_hex(s).map_err(|e| RpcError::InvalidRequest(e.to_string())))
            .transpose()
    }
}

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Serialize)]
pub struct PageMeta {
    /// Cursor for the next page, or absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// A full page may have more behind it; a short page is the last.
pub fn next_cursor(last: Option<&VoteId>, returned: usize, limit: u32) -> Option<String> {
    if (returned as u32) < limit {
        None
    } else {
        last.map(|id| id.to_string())
    }
}
