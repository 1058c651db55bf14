//! RPC error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use ballot_reconciler::ReconcileError;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("metrics encoding failed: {0}")]
    Metrics(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl RpcError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Reconcile(e) => match e {
                ReconcileError::ElectionNotFound(_) | ReconcileError::VoteNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ReconcileError::DuplicateVote { .. }
                | ReconcileError::ElectionExists { .. }
                | ReconcileError::IdempotencyConflict(_)
                | ReconcileError::SubmissionInProgress(_)
                | ReconcileError::ReorgDetected { .. } => StatusCode::CONFLICT,
                ReconcileError::ElectionNotOpen { .. }
                | ReconcileError::InvalidCandidate { .. }
                | ReconcileError::InvalidElection(_)
                | ReconcileError::TransactionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ReconcileError::SubmissionFailed(_) | ReconcileError::Ledger(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ReconcileError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Metrics(_) => "metrics",
            Self::Reconcile(e) => e.reason(),
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Storage details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
            self.to_string()
        };
        let body = ErrorBody {
            error: self.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
