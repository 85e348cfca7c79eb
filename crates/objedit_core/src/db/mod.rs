//! Object database bootstrap for `SqliteObjectRepository`.
//!
//! # Responsibility
//! - Open connections with the pragmas the object tables rely on.
//! - Bring the schema to the version this binary ships, or refuse.
//!
//! # Invariants
//! - The schema version lives in `PRAGMA user_version`.
//! - A repository only wraps a connection whose version matches exactly.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use migrations::ensure_current_schema;
pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Storage failure, tagged with the bootstrap step that hit it.
#[derive(Debug)]
pub enum DbError {
    /// The connection itself could not be established (`mode` is `file`/`memory`).
    Open {
        mode: &'static str,
        source: rusqlite::Error,
    },
    /// Migration script `version` failed; the whole migration run rolled back.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    /// The file was written by a newer binary.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Connection was not migrated through `open_db*`.
    SchemaMismatch { db_version: u32, expected: u32 },
    /// Query failure on an already bootstrapped connection.
    Sqlite(rusqlite::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { mode, source } => {
                write!(f, "cannot open {mode} object database: {source}")
            }
            Self::Migration { version, source } => {
                write!(f, "object schema migration {version} failed: {source}")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "object database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::SchemaMismatch {
                db_version,
                expected,
            } => write!(
                f,
                "object repository requires schema version {expected}, got {db_version}"
            ),
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Migration { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::SchemaMismatch { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
