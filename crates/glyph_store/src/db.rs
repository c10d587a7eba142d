//! SQLite connection setup shared by the identity store, session
//! keystore, and security log sink.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use crate::error::StoreError;
use crate::identity_store::IdentityStore;
use crate::kek_cache::KekCache;
use crate::keystore::SessionKeystore;
use crate::security_log::SecurityLog;

/// Central store handle. Cheap to clone (pool is `Arc` internally).
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
    pub kek_cache: KekCache,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path` and run all
    /// pending migrations.
    ///
    /// WAL journal mode is configured at connection time here, not inside
    /// a migration — SQLite forbids changing `journal_mode` inside a
    /// transaction, and sqlx wraps every migration in one.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self {
            pool,
            kek_cache: KekCache::new(),
        })
    }

    pub fn identities(&self) -> IdentityStore {
        IdentityStore::new(self.pool.clone())
    }

    pub fn sessions(&self) -> SessionKeystore {
        SessionKeystore::new(self.pool.clone(), self.kek_cache.clone())
    }

    pub fn security_log(&self) -> SecurityLog {
        SecurityLog::new(self.pool.clone())
    }
}
