//! LMDB environment setup.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::{LmdbBallotStore, LmdbError, LmdbMetaStore};

pub(crate) const ELECTIONS_DB: &str = "elections";
pub(crate) const VOTE_COUNTERS_DB: &str = "vote_counters";
pub(crate) const VOTES_DB: &str = "votes";
pub(crate) const BALLOT_SLOTS_DB: &str = "ballot_slots";
pub(crate) const TX_INDEX_DB: &str = "tx_index";
pub(crate) const IDEMPOTENCY_DB: &str = "idempotency";
pub(crate) const ELECTION_VOTES_DB: &str = "election_votes";
pub(crate) const META_DB: &str = "meta";

/// Default number of named databases the environment is opened with.
pub const DEFAULT_MAX_DBS: u32 = 16;

/// Wraps the LMDB environment and all database handles.
pub struct LmdbEnvironment {
    env: Env,
    pub(crate) elections_db: Database<Bytes, Bytes>,
    pub(crate) vote_counters_db: Database<Bytes, Bytes>,
    pub(crate) votes_db: Database<Bytes, Bytes>,
    pub(crate) ballot_slots_db: Database<Bytes, Bytes>,
    pub(crate) tx_index_db: Database<Bytes, Bytes>,
    pub(crate) idempotency_db: Database<Bytes, Bytes>,
    pub(crate) election_votes_db: Database<Bytes, Bytes>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given path, creating every
    /// named database the backend uses.
    pub fn open(path: &Path, max_dbs: u32, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the data file is never truncated or modified by anything else.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(max_dbs)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let elections_db = env.create_database(&mut wtxn, Some(ELECTIONS_DB))?;
        let vote_counters_db = env.create_database(&mut wtxn, Some(VOTE_COUNTERS_DB))?;
        let votes_db = env.create_database(&mut wtxn, Some(VOTES_DB))?;
        let ballot_slots_db = env.create_database(&mut wtxn, Some(BALLOT_SLOTS_DB))?;
        let tx_index_db = env.create_database(&mut wtxn, Some(TX_INDEX_DB))?;
        let idempotency_db = env.create_database(&mut wtxn, Some(IDEMPOTENCY_DB))?;
        let election_votes_db = env.create_database(&mut wtxn, Some(ELECTION_VOTES_DB))?;
        let meta_db = env.create_database(&mut wtxn, Some(META_DB))?;
        wtxn.commit()?;

        tracing::debug!(path = %path.display(), map_size, "opened LMDB environment");

        Ok(Self {
            env,
            elections_db,
            vote_counters_db,
            votes_db,
            ballot_slots_db,
            tx_index_db,
            idempotency_db,
            election_votes_db,
            meta_db,
        })
    }

    /// The underlying heed environment.
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Election and vote store sharing this environment.
    pub fn ballot_store(&self) -> LmdbBallotStore {
        LmdbBallotStore {
            env: self.env.clone(),
            elections_db: self.elections_db,
            vote_counters_db: self.vote_counters_db,
            votes_db: self.votes_db,
            ballot_slots_db: self.ballot_slots_db,
            tx_index_db: self.tx_index_db,
            idempotency_db: self.idempotency_db,
            election_votes_db: self.election_votes_db,
        }
    }

    pub fn meta_store(&self) -> LmdbMetaStore {
        LmdbMetaStore {
            env: self.env.clone(),
            meta_db: self.meta_db,
        }
    }
}
