//! Service layer over `HubDb`.
//!
//! All repository methods are implemented as `impl HubService` blocks in
//! [`crate::repos`]. The service is `Send + Sync` and is shared behind an `Arc`
//! by the engine, the scheduler, and the CLI.

use crate::HubDb;
use crate::error::DatabaseError;

pub struct HubService {
    db: HubDb,
}

impl HubService {
    /// Open a service over a local database file, or `":memory:"` for tests.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or migrated.
    pub async fn new_local(db_path: &str) -> Result<Self, DatabaseError> {
        Ok(Self {
            db: HubDb::open_local(db_path).await?,
        })
    }

    /// Create from an existing `HubDb`.
    #[must_use]
    pub const fn from_db(db: HubDb) -> Self {
        Self { db }
    }

    /// Access the underlying database handle.
    #[must_use]
    pub const fn db(&self) -> &HubDb {
        &self.db
    }
}
