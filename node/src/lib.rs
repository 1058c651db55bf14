//! Ballot reconciler node.
//!
//! The node wires the pieces together:
//! - Opens and migrates the LMDB store, then checks its integrity
//! - Connects the ledger client and the vote notifier
//! - Runs the confirmation and audit workers
//! - Serves the HTTP API until shutdown

pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod shutdown;

pub use config::{NodeConfig, NotifierConfig, NotifierKind};
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use node::BallotNode;
pub use shutdown::ShutdownController;
