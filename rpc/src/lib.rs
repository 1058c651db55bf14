//! HTTP API for the ballot reconciler.
//!
//! Provides endpoints for:
//! - Vote submission (with optional `Idempotency-Key`), confirmation and audit
//! - Vote lookup by id or transaction hash
//! - Election registration, activation and cancellation
//! - Results, paginated vote listings and tally verification
//! - Prometheus metrics and health

pub mod error;
pub mod handlers;
pub mod pagination;
pub mod server;

pub use error::RpcError;
pub use server::{rpc_span, AppState, RpcServer};
