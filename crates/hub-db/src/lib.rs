//! # hub-db
//!
//! libSQL persistence for the data hub.
//!
//! Holds all relational state: thematic libraries and interfaces, sync tasks,
//! execution records, record-level lineage, and cross-instance scheduler
//! locks. Uses the `libsql` crate (C `SQLite` fork, v0.9.29) in local mode.
//!
//! One connection is shared by every caller. Writes go through
//! [`HubDb::execute`] or a [`WriteTx`], both of which hold the write lock, so
//! a transaction never absorbs another task's statements.

pub mod error;
pub mod helpers;
mod migrations;
pub mod repos;
pub mod service;
#[cfg(test)]
mod test_support;
pub mod updates;

use error::DatabaseError;
use libsql::Builder;
use libsql::params::IntoParams;
use tokio::sync::{Mutex, MutexGuard};

/// Central database handle for all hub state operations.
pub struct HubDb {
    #[allow(dead_code)]
    db: libsql::Database,
    conn: libsql::Connection,
    write_lock: Mutex<()>,
}

impl HubDb {
    /// Open a local database at the given path, or `":memory:"`.
    ///
    /// Runs migrations automatically on first open.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or
    /// migrations fail.
    pub async fn open_local(path: &str) -> Result<Self, DatabaseError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        // Enable foreign keys (must be per-connection in SQLite)
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Migration(format!("PRAGMA foreign_keys: {e}")))?;

        let hub_db = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
        };
        hub_db.run_migrations().await?;
        tracing::debug!(path, "metadata store opened");
        Ok(hub_db)
    }

    /// Access the underlying libSQL connection for reads.
    #[must_use]
    pub const fn conn(&self) -> &libsql::Connection {
        &self.conn
    }

    /// Execute one write statement under the write lock.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::LibSql` if the statement fails.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> Result<u64, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        Ok(self.conn.execute(sql, params).await?)
    }

    /// Begin a write transaction. The write lock is held until commit or rollback.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::LibSql` if `BEGIN` fails.
    pub async fn begin(&self) -> Result<WriteTx<'_>, DatabaseError> {
        let guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await?;
        Ok(WriteTx { tx, _guard: guard })
    }

    /// Generate a prefixed ID via libSQL. Returns e.g., `"stk-a3f8b2c1"`.
    ///
    /// Uses `randomblob(4)` in SQL to produce 8-char hex, then prepends the prefix.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails or returns no rows.
    pub async fn generate_id(&self, prefix: &str) -> Result<String, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT '{prefix}-' || lower(hex(randomblob(4)))"),
                (),
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        Ok(row.get::<String>(0)?)
    }
}

/// An open write transaction holding the write lock.
pub struct WriteTx<'a> {
    tx: libsql::Transaction,
    _guard: MutexGuard<'a, ()>,
}

impl WriteTx<'_> {
    /// # Errors
    ///
    /// Returns `DatabaseError::LibSql` if the statement fails.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> Result<u64, DatabaseError> {
        Ok(self.tx.execute(sql, params).await?)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::LibSql` if the query fails.
    pub async fn query(
        &self,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<libsql::Rows, DatabaseError> {
        Ok(self.tx.query(sql, params).await?)
    }

    /// Run a `SELECT COUNT(*) ...` inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn count(&self, sql: &str, params: impl IntoParams) -> Result<u64, DatabaseError> {
        let mut rows = self.query(sql, params).await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        helpers::get_count(&row, 0)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::LibSql` if `COMMIT` fails.
    pub async fn commit(self) -> Result<(), DatabaseError> {
        Ok(self.tx.commit().await?)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::LibSql` if `ROLLBACK` fails.
    pub async fn rollback(self) -> Result<(), DatabaseError> {
        Ok(self.tx.rollback().await?)
    }

    /// Commit on `Ok`, roll back on `Err`, and pass the result through.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or the commit error.
    pub async fn finish<T>(self, result: Result<T, DatabaseError>) -> Result<T, DatabaseError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Helper to create an in-memory database for testing.
    async fn test_db() -> HubDb {
        HubDb::open_local(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn open_local_creates_schema() {
        let db = test_db().await;

        let tables = [
            "thematic_libraries",
            "thematic_interfaces",
            "data_flow_graphs",
            "api_interfaces",
            "sync_tasks",
            "sync_executions",
            "data_lineage",
            "scheduler_locks",
        ];
        for table in &tables {
            let mut rows = db
                .conn()
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap();
            assert!(row.is_some(), "table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn generate_id_correct_format() {
        let db = test_db().await;
        let id = db.generate_id("stk").await.unwrap();
        assert!(id.starts_with("stk-"), "ID should start with 'stk-': {id}");
        assert_eq!(id.len(), 12, "3 prefix + 1 dash + 8 hex: {id}");
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn generate_id_uniqueness() {
        let db = test_db().await;
        let mut ids = HashSet::new();
        for _ in 0..100 {
            let id = db.generate_id("exe").await.unwrap();
            assert!(ids.insert(id.clone()), "Duplicate ID generated: {id}");
        }
    }

    #[tokio::test]
    async fn idempotent_migrations() {
        let db = test_db().await;
        db.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let db = test_db().await;
        let tx = db.begin().await.unwrap();
        tx.execute(
            "INSERT INTO scheduler_locks (lock_key, owner, expires_at) VALUES ('k', 'o', 0)",
            (),
        )
        .await
        .unwrap();
        let failed: Result<(), DatabaseError> = Err(DatabaseError::Conflict("abort".into()));
        assert!(tx.finish(failed).await.is_err());

        let mut rows = db
            .conn()
            .query("SELECT COUNT(*) FROM scheduler_locks", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 0);
    }
}
