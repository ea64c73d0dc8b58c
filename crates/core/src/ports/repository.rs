//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `namesake-storage`).

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{
    Address, Blockchain, Domain, DomainSnapshot, IndexerCursor, Node, RegistryEvent,
};

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for mirrored domains and their resolutions.
#[async_trait]
pub trait DomainRepository: Send + Sync {
    /// Get domain (with every resolution) by node.
    async fn find_by_node(&self, node: &Node) -> StorageResult<Option<Domain>>;

    /// Get domain (with every resolution) by name.
    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Domain>>;

    /// List domains owned by any of `owners` on any chain, ordered by name.
    ///
    /// A non-empty `tlds` keeps only domains whose parent is one of them.
    async fn list_by_owners(
        &self,
        owners: &[Address],
        tlds: &[String],
        limit: u32,
    ) -> StorageResult<Vec<Domain>>;
}

/// Read access to the append-only registry event log.
#[async_trait]
pub trait RegistryEventRepository: Send + Sync {
    /// Highest block with a stored event for a chain.
    async fn latest_block(&self, blockchain: Blockchain, network_id: u64)
    -> StorageResult<Option<u64>>;

    /// Latest Transfer of a node on each blockchain.
    ///
    /// Ordered by blockchain, then block number and log index descending.
    async fn latest_transfers(&self, node: &Node) -> StorageResult<Vec<RegistryEvent>>;

    /// Every stored event of a node, oldest first.
    async fn list_for_node(&self, node: &Node) -> StorageResult<Vec<RegistryEvent>>;
}

/// Repository for indexer cursor state.
#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Get current cursor for a chain.
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Data bundle for atomic chunk persistence.
#[derive(Debug)]
pub struct ChunkData<'a> {
    /// Final per-chain snapshots of every domain the chunk touched.
    pub domains: &'a [DomainSnapshot],
    /// Every log fetched for the chunk.
    pub events: &'a [RegistryEvent],
    pub cursor: &'a IndexerCursor,
}

/// Combined repository access for the sync service.
///
/// This trait provides access to all individual repositories and
/// atomic operations that span multiple tables.
#[async_trait]
pub trait Repositories: Send + Sync {
    /// Access the domain repository.
    fn domains(&self) -> &dyn DomainRepository;

    /// Access the registry event repository.
    fn events(&self) -> &dyn RegistryEventRepository;

    /// Access the cursor repository.
    fn cursor(&self) -> &dyn CursorRepository;

    /// Persist a chunk atomically in a single transaction.
    ///
    /// Upserts domain snapshots (with their parent rows), inserts events
    /// ignoring ones already stored, and moves the cursor. If any
    /// operation fails, everything is rolled back.
    ///
    /// Returns the number of events actually inserted.
    async fn persist_chunk_atomic(&self, data: ChunkData<'_>) -> StorageResult<u64>;
}
