//! Nullable infrastructure for deterministic testing.
//!
//! Every external collaborator of the reconciler (clock, ledger, storage)
//! sits behind a trait. This crate provides test-friendly implementations
//! that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod ledger;
pub mod store;

pub use clock::NullClock;
pub use ledger::{FailureKind, NullLedger};
pub use store::NullStore;
