//! Cross-process execution locks in `scheduler_locks`.
//!
//! A lock row is live while `expires_at` (unix millis) is in the future.
//! Acquisition is one atomic upsert that only overwrites an expired row.

use std::time::Duration;

use crate::error::DatabaseError;
use crate::helpers::now;
use crate::service::HubService;

fn expiry_after(ttl: Duration) -> (i64, i64) {
    let now_ms = now().timestamp_millis();
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    (now_ms, now_ms.saturating_add(ttl_ms))
}

impl HubService {
    /// Take `key` for `owner` unless another live holder has it.
    ///
    /// Not re-entrant: an owner already holding the lock gets `false`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the statement fails.
    pub async fn try_acquire_lock(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, DatabaseError> {
        let (now_ms, expires_at) = expiry_after(ttl);
        let changed = self
            .db()
            .execute(
                "INSERT INTO scheduler_locks (lock_key, owner, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(lock_key) DO UPDATE
                 SET owner = excluded.owner, expires_at = excluded.expires_at
                 WHERE scheduler_locks.expires_at <= ?4",
                libsql::params![key, owner, expires_at, now_ms],
            )
            .await?;
        Ok(changed == 1)
    }

    /// Release `key` if `owner` holds it. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the statement fails.
    pub async fn release_lock(&self, key: &str, owner: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .db()
            .execute(
                "DELETE FROM scheduler_locks WHERE lock_key = ?1 AND owner = ?2",
                [key, owner],
            )
            .await?;
        Ok(changed == 1)
    }

    /// Extend a live lock held by `owner`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the statement fails.
    pub async fn refresh_lock(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, DatabaseError> {
        let (now_ms, expires_at) = expiry_after(ttl);
        let changed = self
            .db()
            .execute(
                "UPDATE scheduler_locks SET expires_at = ?1
                 WHERE lock_key = ?2 AND owner = ?3 AND expires_at > ?4",
                libsql::params![expires_at, key, owner, now_ms],
            )
            .await?;
        Ok(changed == 1)
    }

    /// Current live holder of `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn lock_holder(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                "SELECT owner FROM scheduler_locks WHERE lock_key = ?1 AND expires_at > ?2",
                libsql::params![key, now().timestamp_millis()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }
}
