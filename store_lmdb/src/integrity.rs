//! LMDB database integrity checks.
//!
//! Run on startup to detect corruption early, before the reconciler starts
//! moving votes between states.

use std::path::Path;

use heed::types::Bytes;
use heed::Env;

use crate::environment::{
    BALLOT_SLOTS_DB, ELECTIONS_DB, ELECTION_VOTES_DB, IDEMPOTENCY_DB, META_DB, TX_INDEX_DB,
    VOTES_DB, VOTE_COUNTERS_DB,
};
use crate::LmdbError;

/// Summary of an integrity check run.
#[derive(Debug)]
pub struct IntegrityReport {
    pub databases_checked: u32,
    pub total_entries: u64,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }
}

const EXPECTED_DATABASES: &[&str] = &[
    ELECTIONS_DB,
    VOTE_COUNTERS_DB,
    VOTES_DB,
    BALLOT_SLOTS_DB,
    TX_INDEX_DB,
    IDEMPOTENCY_DB,
    ELECTION_VOTES_DB,
    META_DB,
];

/// Open each expected database and count its entries. Read failures and
/// missing databases are recorded in the report rather than returned.
///
/// Also checks that the tx index and the vote table agree in size, since
/// every committed vote writes exactly one index entry.
pub fn check_integrity(env: &Env) -> Result<IntegrityReport, LmdbError> {
    let mut report = IntegrityReport {
        databases_checked: 0,
        total_entries: 0,
        errors: Vec::new(),
    };

    let rtxn = env.read_txn()?;
    let mut votes = None;
    let mut tx_index = None;

    for &db_name in EXPECTED_DATABASES {
        match env.open_database::<Bytes, Bytes>(&rtxn, Some(db_name)) {
            Ok(Some(db)) => {
                report.databases_checked += 1;
                match db.len(&rtxn) {
                    Ok(count) => {
                        report.total_entries += count;
                        if db_name == VOTES_DB {
                            votes = Some(count);
                        } else if db_name == TX_INDEX_DB {
                            tx_index = Some(count);
                        }
                    }
                    Err(e) => report
                        .errors
                        .push(format!("failed to read database '{db_name}': {e}")),
                }
            }
            Ok(None) => report.errors.push(format!("database '{db_name}' is missing")),
            Err(e) => report
                .errors
                .push(format!("failed to open database '{db_name}': {e}")),
        }
    }

    if let (Some(votes), Some(tx_index)) = (votes, tx_index) {
        if votes != tx_index {
            report.errors.push(format!(
                "vote table has {votes} entries but tx index has {tx_index}"
            ));
        }
    }

    Ok(report)
}

/// Check if the LMDB data directory looks valid before opening.
///
/// A nonexistent directory is a fresh start. An existing directory without
/// `data.mdb` suggests corruption or misconfiguration.
pub fn check_data_dir(path: &Path) -> Result<(), LmdbError> {
    if !path.exists() {
        return Ok(());
    }
    if !path.join("data.mdb").exists() {
        return Err(LmdbError::Corruption(format!(
            "LMDB directory exists but data.mdb is missing at {}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmdbEnvironment;

    #[test]
    fn check_data_dir_fresh_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_data_dir(&dir.path().join("not-created-yet")).is_ok());
    }

    #[test]
    fn check_data_dir_without_data_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_data_dir(dir.path()).is_err());
    }

    #[test]
    fn freshly_opened_environment_is_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let env = LmdbEnvironment::open(dir.path(), 16, 10 * 1024 * 1024).unwrap();
        let report = check_integrity(env.env()).unwrap();
        assert!(report.is_healthy(), "{:?}", report.errors);
        assert_eq!(report.databases_checked, EXPECTED_DATABASES.len() as u32);
        assert_eq!(report.total_entries, 0);
        assert!(check_data_dir(dir.path()).is_ok());
    }
}
