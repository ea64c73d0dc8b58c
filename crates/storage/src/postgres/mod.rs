//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `namesake-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgDomainRepository`, `PgRegistryEventRepository`, `PgCursorRepository`
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod cursor_repo;
mod database;
mod domain_repo;
mod event_repo;
mod helpers;

pub use cursor_repo::PgCursorRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};
pub use domain_repo::PgDomainRepository;
pub use event_repo::PgRegistryEventRepository;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use namesake_core::error::{StorageError, StorageResult};
use namesake_core::ports::{
    ChunkData, CursorRepository, DomainRepository, RegistryEventRepository, Repositories,
};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
///
/// This provides a single entry point for all storage operations and
/// implements atomic transactions that span multiple tables.
pub struct PgRepositories {
    db: Arc<Database>,
    domains: PgDomainRepository,
    events: PgRegistryEventRepository,
    cursor: PgCursorRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        let pool = db.pool().clone();
        Self {
            domains: PgDomainRepository::new(pool.clone()),
            events: PgRegistryEventRepository::new(pool),
            cursor: PgCursorRepository::new(&db),
            db,
        }
    }
}

#[async_trait]
impl Repositories for PgRepositories {
    fn domains(&self) -> &dyn DomainRepository {
        &self.domains
    }

    fn events(&self) -> &dyn RegistryEventRepository {
        &self.events
    }

    fn cursor(&self) -> &dyn CursorRepository {
        &self.cursor
    }

    async fn persist_chunk_atomic(&self, data: ChunkData<'_>) -> StorageResult<u64> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for snapshot in data.domains {
            domain_repo::upsert_snapshot(&mut *tx, snapshot).await?;
        }

        let inserted = event_repo::insert_events(&mut *tx, data.events).await?;

        cursor_repo::upsert_cursor(&mut *tx, data.cursor).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        trace!(
            domains = data.domains.len(),
            events = data.events.len(),
            inserted,
            block = data.cursor.last_indexed_block,
            "Chunk persisted"
        );
        Ok(inserted)
    }
}
