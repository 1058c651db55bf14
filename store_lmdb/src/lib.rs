//! LMDB storage backend for the ballot ledger reconciler.
//!
//! Implements the `ballot-store` traits using the `heed` LMDB bindings. All
//! logical stores live in one environment so a vote transition, its slot and
//! its election counter change inside a single write transaction. LMDB admits
//! one writer at a time, which is what makes check-then-insert atomic.

pub mod ballot;
pub mod environment;
pub mod error;
pub mod integrity;
pub mod keys;
pub mod meta;
pub mod migration;

pub use ballot::LmdbBallotStore;
pub use environment::{LmdbEnvironment, DEFAULT_MAX_DBS};
pub use error::LmdbError;
pub use integrity::{check_data_dir, check_integrity, IntegrityReport};
pub use meta::LmdbMetaStore;
pub use migration::{Migrator, CURRENT_SCHEMA_VERSION};
