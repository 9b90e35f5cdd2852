#![forbid(unsafe_code)]

mod cells;
mod checkpoints;
mod completion;
mod deps;
mod error;
mod events;
mod export;
mod messages;
mod projections;
mod reservations;
mod reviews;
mod signals;
mod strikes;
mod support;
mod types;

pub use error::{ErrorKind, StoreError};
pub use events::EventCursor;
pub use export::{CellRecord, RecordDependency};
pub use support::now_ms;
pub use types::*;

use cm_core::events::CellEvent;
use cm_core::ids::ProjectKey;
use cm_core::model::{CellStatus, CellType, DependencyKind};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use support::*;

pub const DB_FILE_NAME: &str = "cellmind.db";

/// One connection to the project database. Every agent process opens its own.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE_NAME);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        migrate_sqlite_schema(&conn)?;

        tracing::debug!(dir = %storage_dir.display(), "store opened");
        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join(DB_FILE_NAME)
    }

    pub fn schema_version(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn project_init(&mut self, project: &ProjectKey) -> Result<(), StoreError> {
        let tx = self.write_tx()?;
        ensure_project_tx(&tx, project.as_str(), now_ms())?;
        tx.commit()?;
        Ok(())
    }

    pub fn project_exists(&self, project: &ProjectKey) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM projects WHERE project=?1",
                params![project.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// `BEGIN IMMEDIATE`: the write lock is taken up front so check-then-set holds.
    fn write_tx(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}
