//! Database schema migration engine.
//!
//! Tracks a monotonically increasing schema version in the meta store and
//! runs sequential migration steps to bring an older database up to date.

use ballot_store::MetaStore;

use crate::LmdbError;

/// The schema version that the current code expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Runs database migrations to bring the schema up to date.
pub struct Migrator;

impl Migrator {
    /// Check the stored schema version and run any needed migrations.
    ///
    /// Version 0 is a fresh database. A stored version higher than
    /// [`CURRENT_SCHEMA_VERSION`] was written by a newer build and is refused.
    pub fn run(meta_store: &impl MetaStore) -> Result<(), LmdbError> {
        let current = meta_store
            .get_schema_version()
            .map_err(|e| LmdbError::Schema(e.to_string()))?;

        if current == CURRENT_SCHEMA_VERSION {
            tracing::info!(version = current, "database schema is up to date");
            return Ok(());
        }

        if current > CURRENT_SCHEMA_VERSION {
            return Err(LmdbError::Schema(format!(
                "database schema version {current} is newer than supported version {CURRENT_SCHEMA_VERSION}"
            )));
        }

        for version in current..CURRENT_SCHEMA_VERSION {
            tracing::info!(from = version, to = version + 1, "running migration");
            run_migration(version, version + 1)?;
        }

        meta_store
            .set_schema_version(CURRENT_SCHEMA_VERSION)
            .map_err(|e| LmdbError::Schema(e.to_string()))?;

        tracing::info!(version = CURRENT_SCHEMA_VERSION, "migration complete");
        Ok(())
    }
}

fn run_migration(from: u32, to: u32) -> Result<(), LmdbError> {
    match (from, to) {
        // Initial layout: every database is created by `LmdbEnvironment::open`.
        (0, 1) => Ok(()),
        _ => Err(LmdbError::Schema(format!("unknown migration: {from} -> {to}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmdbEnvironment;

    fn temp_env() -> (tempfile::TempDir, LmdbEnvironment) {
        let dir = tempfile::tempdir().expect("temp dir");
        let env = LmdbEnvironment::open(dir.path(), 16, 10 * 1024 * 1024).expect("open env");
        (dir, env)
    }

    #[test]
    fn unknown_migration_is_error() {
        assert!(run_migration(99, 100).is_err());
    }

    #[test]
    fn fresh_database_is_migrated_to_current() {
        let (_dir, env) = temp_env();
        let meta = env.meta_store();
        Migrator::run(&meta).expect("migrate");
        assert_eq!(meta.get_schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        // Second run is a no-op.
        Migrator::run(&meta).expect("rerun");
    }

    #[test]
    fn newer_schema_is_refused() {
        let (_dir, env) = temp_env();
        let meta = env.meta_store();
        meta.set_schema_version(CURRENT_SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(Migrator::run(&meta), Err(LmdbError::Schema(_))));
    }
}
