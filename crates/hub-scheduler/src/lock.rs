//! Distributed execution locks.
//!
//! A lock is held by one owner identity until it is released or its TTL
//! runs out. The TTL has to outlast the slowest run: once it expires another
//! instance may take the lock while the first run is still going.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use hub_core::errors::CoreError;
use hub_db::service::HubService;

/// Narrow lock capability used by the scheduler. Every implementation acts
/// on behalf of one owner.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Owner identity this handle locks as.
    fn owner(&self) -> &str;

    /// Take `key` for `ttl`. `false` means someone else holds it.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CoreError>;

    /// Release `key` if this owner holds it. Returns whether it did.
    async fn unlock(&self, key: &str) -> Result<bool, CoreError>;

    /// Extend a lock this owner still holds.
    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, CoreError>;

    async fn is_locked(&self, key: &str) -> Result<bool, CoreError>;
}

// ---------------------------------------------------------------------------
// MemoryLock
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LockTable {
    held: HashMap<String, (String, Instant)>,
}

impl LockTable {
    fn live_owner(&mut self, key: &str, now: Instant) -> Option<&str> {
        if self.held.get(key).is_some_and(|(_, expires)| *expires <= now) {
            self.held.remove(key);
        }
        self.held.get(key).map(|(owner, _)| owner.as_str())
    }
}

/// Process-local lock. Handles made with [`MemoryLock::with_owner`] share
/// one table, which is how tests model several instances.
#[derive(Debug, Clone)]
pub struct MemoryLock {
    owner: String,
    table: Arc<Mutex<LockTable>>,
}

impl MemoryLock {
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            table: Arc::new(Mutex::new(LockTable::default())),
        }
    }

    /// Another owner over the same table.
    #[must_use]
    pub fn with_owner(&self, owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            table: Arc::clone(&self.table),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CoreError> {
        let now = Instant::now();
        let mut table = self.table();
        if table.live_owner(key, now).is_some() {
            return Ok(false);
        }
        table
            .held
            .insert(key.to_string(), (self.owner.clone(), now + ttl));
        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<bool, CoreError> {
        let mut table = self.table();
        if table.live_owner(key, Instant::now()) == Some(self.owner.as_str()) {
            table.held.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, CoreError> {
        let now = Instant::now();
        let mut table = self.table();
        if table.live_owner(key, now) != Some(self.owner.as_str()) {
            return Ok(false);
        }
        if let Some(entry) = table.held.get_mut(key) {
            entry.1 = now + ttl;
        }
        Ok(true)
    }

    async fn is_locked(&self, key: &str) -> Result<bool, CoreError> {
        Ok(self.table().live_owner(key, Instant::now()).is_some())
    }
}

// ---------------------------------------------------------------------------
// DbLock
// ---------------------------------------------------------------------------

/// Lock rows in the metadata store, shared by every process using it.
pub struct DbLock {
    svc: Arc<HubService>,
    owner: String,
}

impl DbLock {
    #[must_use]
    pub fn new(svc: Arc<HubService>, owner: impl Into<String>) -> Self {
        Self {
            svc,
            owner: owner.into(),
        }
    }
}

#[async_trait]
impl DistributedLock for DbLock {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CoreError> {
        Ok(self.svc.try_acquire_lock(key, &self.owner, ttl).await?)
    }

    async fn unlock(&self, key: &str) -> Result<bool, CoreError> {
        Ok(self.svc.release_lock(key, &self.owner).await?)
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, CoreError> {
        Ok(self.svc.refresh_lock(key, &self.owner, ttl).await?)
    }

    async fn is_locked(&self, key: &str) -> Result<bool, CoreError> {
        Ok(self.svc.lock_holder(key).await?.is_some())
    }
}

// ---------------------------------------------------------------------------
// LockGuard
// ---------------------------------------------------------------------------

/// A held lock. Call [`LockGuard::release`] when done; a guard dropped
/// without it unlocks from a spawned task.
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    key: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("owner", &self.lock.owner())
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    /// Take `key` or fail with `CoreError::LockContention`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::LockContention` when another owner holds the
    /// lock, or the backend's error.
    pub async fn acquire(
        lock: Arc<dyn DistributedLock>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, CoreError> {
        let key = key.into();
        if !lock.try_lock(&key, ttl).await? {
            return Err(CoreError::LockContention { key });
        }
        debug!(key = %key, owner = lock.owner(), "lock acquired");
        Ok(Self {
            lock,
            key,
            released: false,
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Unlock now. Failures are logged; the TTL cleans up after them.
    pub async fn release(mut self) {
        self.released = true;
        match self.lock.unlock(&self.key).await {
            Ok(true) => debug!(key = %self.key, "lock released"),
            Ok(false) => warn!(key = %self.key, "lock expired before release"),
            Err(e) => warn!(key = %self.key, error = %e, "lock release failed"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "no runtime to release lock; it expires with its TTL");
            return;
        };
        let lock = Arc::clone(&self.lock);
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            if let Err(e) = lock.unlock(&key).await {
                warn!(key = %key, error = %e, "deferred lock release failed");
            }
        });
    }
}
