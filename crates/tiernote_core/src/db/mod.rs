//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for TierNote core.
//! - Apply schema migrations in deterministic order.
//! - Classify SQLite failures that mean "another writer holds the lock".
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write application data before migrations succeed.

use rusqlite::{Connection, ErrorCode};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Connection was handed over before migrations were applied.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl DbError {
    /// Returns true when the failure is write contention on the database lock.
    ///
    /// These are the only failures a transaction runner may retry; everything
    /// else is a stable outcome.
    pub fn is_write_conflict(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
            Self::UninitializedConnection { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Verifies that `conn` is migrated to the version this binary expects.
pub fn ensure_schema_ready(conn: &Connection) -> DbResult<()> {
    let expected_version = migrations::latest_version();
    let actual_version = migrations::current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(DbError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::DbError;
    use rusqlite::ffi;

    #[test]
    fn busy_and_locked_are_write_conflicts() {
        for code in [ffi::SQLITE_BUSY, ffi::SQLITE_LOCKED] {
            let err = DbError::Sqlite(rusqlite::Error::SqliteFailure(
                ffi::Error::new(code),
                None,
            ));
            assert!(err.is_write_conflict());
        }
    }

    #[test]
    fn constraint_failure_is_not_a_write_conflict() {
        let err = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!err.is_write_conflict());
        assert!(!DbError::UnsupportedSchemaVersion {
            db_version: 9,
            latest_supported: 2,
        }
        .is_write_conflict());
    }
}
