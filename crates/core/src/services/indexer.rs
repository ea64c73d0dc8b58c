//! Sync service - drives the polling loop for one registry on one chain.
//!
//! Each cycle mirrors the confirmed range above the watermark, chunk by
//! chunk. A chunk is fetched, ordered, projected and committed in a single
//! storage transaction; the watermark only moves on commit.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ChainError, IndexerError, IndexerResult};
use crate::metrics::{ChunkTimer, record_chunk_committed, record_chunk_retry, set_watermark};
use crate::models::{IndexerCursor, RegistryEvent, chain_id};
use crate::ports::{ChainAdapter, ChunkData, Repositories};
use crate::services::fetcher::EventFetcher;
use crate::services::orderer::EventOrderer;
use crate::services::projector::DomainProjector;

// Backoff at the single-block floor
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the sync service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Blocks behind the head considered final.
    pub confirmation_blocks: u64,
    /// Maximum blocks per chunk.
    pub block_fetch_limit: u64,
    /// Delay between cycles.
    pub fetch_interval: Duration,
    /// First block to mirror when nothing is stored yet.
    pub start_block: u64,
    /// Attempts at the single-block floor before the cycle fails.
    pub max_retries: u32,
    /// First backoff delay at the single-block floor.
    pub retry_delay: Duration,
    /// Upper bound on one chunk's fetch, projection and commit.
    pub chunk_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            confirmation_blocks: 3,
            block_fetch_limit: 500,
            fetch_interval: Duration::from_secs(5),
            start_block: 0,
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            chunk_timeout: Duration::from_secs(300),
        }
    }
}

/// What a cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing confirmed above the watermark.
    CaughtUp { watermark: u64 },
    /// Blocks `from..=to` were committed.
    Synced { from: u64, to: u64 },
}

// =============================================================================
// SyncService
// =============================================================================

/// Mirrors one registry into storage.
///
/// # Flow
///
/// 1. Watermark = highest committed block (cursor or stored events)
/// 2. Confirmed head = chain head minus confirmation blocks
/// 3. Page `[watermark + 1, head]` into chunks
/// 4. Per chunk: fetch, order, project, persist atomically
/// 5. On failure, retry the same range with half the page size
pub struct SyncService<C: ChainAdapter, R: Repositories> {
    config: SyncConfig,
    chain_id: String,
    chain: Arc<C>,
    repositories: Arc<R>,
    fetcher: EventFetcher<C>,
    projector: DomainProjector<C, R>,
}

impl<C: ChainAdapter, R: Repositories> SyncService<C, R> {
    pub fn new(config: SyncConfig, chain: Arc<C>, repositories: Arc<R>) -> Self {
        Self {
            chain_id: chain_id(chain.blockchain(), chain.network_id()),
            fetcher: EventFetcher::new(chain.clone()),
            projector: DomainProjector::new(chain.clone(), repositories.clone()),
            config,
            chain,
            repositories,
        }
    }

    /// Cursor key of the mirrored chain.
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Run cycles on the configured interval until shutdown.
    ///
    /// A failed cycle is logged and the next one resumes from the committed
    /// watermark.
    #[instrument(skip_all, fields(chain = %self.chain_id))]
    pub async fn run(
        &self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        info!(
            registry = %self.chain.registry_address(),
            confirmation_blocks = self.config.confirmation_blocks,
            page_size = self.config.block_fetch_limit,
            "⛓️  Starting registry sync"
        );

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            match self.run_cycle().await {
                Ok(CycleOutcome::Synced { from, to }) => {
                    info!(from, to, "✅ Mirror synced");
                }
                Ok(CycleOutcome::CaughtUp { watermark }) => {
                    debug!(watermark, "Mirror is caught up");
                }
                Err(e) => {
                    error!(error = %e, "❌ Sync cycle failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.fetch_interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Err(IndexerError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Mirror everything confirmed above the watermark.
    ///
    /// Fails with [`IndexerError::ConfigError`] when the confirmed head is
    /// behind the watermark.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> IndexerResult<CycleOutcome> {
        let watermark = self.watermark().await?;
        let head = self.chain.current_block_height().await?;
        let to = head.saturating_sub(self.config.confirmation_blocks);

        info!(head, watermark, to, "🔍 Syncing mirror");

        if to < watermark {
            return Err(IndexerError::ConfigError(format!(
                "sync last block {} is less than the current mirror block {}",
                to, watermark
            )));
        }
        if to == watermark {
            return Ok(CycleOutcome::CaughtUp { watermark });
        }

        self.sync_range(watermark, to, self.config.block_fetch_limit.max(1))
            .await?;
        Ok(CycleOutcome::Synced {
            from: watermark + 1,
            to,
        })
    }

    /// Highest committed block.
    ///
    /// The larger of the cursor and the newest stored event, never below
    /// the block before `start_block`.
    pub async fn watermark(&self) -> IndexerResult<u64> {
        let cursor = self
            .repositories
            .cursor()
            .get_cursor(&self.chain_id)
            .await?
            .map(|c| c.last_indexed_block);
        let latest_event = self
            .repositories
            .events()
            .latest_block(self.chain.blockchain(), self.chain.network_id())
            .await?;
        let floor = self.config.start_block.saturating_sub(1);

        Ok([cursor, latest_event]
            .into_iter()
            .flatten()
            .fold(floor, u64::max))
    }

    /// Commit `(after, to]` in chunks of `page_size`.
    ///
    /// A failing chunk is retried as the same range in pages of half its
    /// length, down to single blocks, which are retried with backoff.
    fn sync_range(&self, after: u64, to: u64, page_size: u64) -> BoxFuture<'_, IndexerResult<()>> {
        async move {
            let mut current = after;

            while current < to {
                let chunk_end = current.saturating_add(page_size).min(to);

                match self.process_chunk(current + 1, chunk_end).await {
                    Ok(()) => {}
                    Err(e) if !e.is_chunk_retryable() => return Err(e),
                    Err(e) if chunk_end - current > 1 => {
                        let half = ((chunk_end - current) / 2).max(1);
                        warn!(
                            from = current + 1,
                            to = chunk_end,
                            page_size = half,
                            error = %e,
                            "⚠️  Chunk failed, retrying with a smaller page"
                        );
                        record_chunk_retry("split");
                        self.sync_range(current, chunk_end, half).await?;
                    }
                    Err(e) => self.retry_block(chunk_end, e).await?,
                }

                current = chunk_end;
            }

            Ok(())
        }
        .boxed()
    }

    /// Retry a single failing block with exponential backoff.
    async fn retry_block(&self, block: u64, first_error: IndexerError) -> IndexerResult<()> {
        let mut delay = self.config.retry_delay;
        let mut last_error = first_error;

        for attempt in 1..=self.config.max_retries {
            warn!(
                block,
                attempt,
                retry_in_ms = delay.as_millis(),
                error = %last_error,
                "⚠️  Block failed, retrying..."
            );
            record_chunk_retry("backoff");
            tokio::time::sleep(delay).await;

            match self.process_chunk(block, block).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_chunk_retryable() => return Err(e),
                Err(e) => last_error = e,
            }
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }

        Err(IndexerError::RetriesExhausted {
            from: block,
            to: block,
            attempts: self.config.max_retries,
            last_error: last_error.to_string(),
        })
    }

    /// One chunk under the configured timeout.
    async fn process_chunk(&self, from: u64, to: u64) -> IndexerResult<()> {
        let _timer = ChunkTimer::new();

        match tokio::time::timeout(self.config.chunk_timeout, self.index_chunk(from, to)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(ChainError::Timeout { from, to }.into()),
        }
    }

    /// Fetch, project and commit `[from, to]`. Returns the number of
    /// events newly stored.
    #[instrument(skip(self))]
    async fn index_chunk(&self, from: u64, to: u64) -> IndexerResult<u64> {
        let raw_events = self.fetcher.fetch(from, to).await?;
        let ordered = EventOrderer::order(&raw_events);
        let projection = self.projector.project(ordered).await?;

        let blockchain = self.chain.blockchain();
        let network_id = self.chain.network_id();
        let events: Vec<RegistryEvent> = raw_events
            .iter()
            .map(|e| e.to_record(blockchain, network_id))
            .collect();

        let cursor = IndexerCursor {
            chain_id: self.chain_id.clone(),
            last_indexed_block: to,
            updated_at: chrono::Utc::now(),
        };

        let inserted = self
            .repositories
            .persist_chunk_atomic(ChunkData {
                domains: &projection.snapshots,
                events: &events,
                cursor: &cursor,
            })
            .await?;

        record_chunk_committed(inserted);
        set_watermark(to);
        info!(
            from,
            to,
            events = events.len(),
            inserted,
            domains = projection.snapshots.len(),
            skipped = projection.skipped,
            "⛓️  Chunk committed"
        );
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, KeyHash, Node};
    use crate::services::testing::{
        FakeChain, MemoryRepositories, mint_transfer_event, new_uri_event, sync_event,
        transfer_event,
    };

    const A: Address = Address([0xaa; 20]);

    fn config(page_size: u64) -> SyncConfig {
        SyncConfig {
            confirmation_blocks: 0,
            block_fetch_limit: page_size,
            fetch_interval: Duration::from_millis(1),
            start_block: 1,
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            chunk_timeout: Duration::from_secs(5),
        }
    }

    fn service(
        page_size: u64,
    ) -> (
        SyncService<FakeChain, MemoryRepositories>,
        Arc<FakeChain>,
        Arc<MemoryRepositories>,
    ) {
        let chain = Arc::new(FakeChain::new());
        let repositories = Arc::new(MemoryRepositories::new());
        let service = SyncService::new(config(page_size), chain.clone(), repositories.clone());
        (service, chain, repositories)
    }

    fn mint(chain: &FakeChain, name: &str, block: u64) -> Node {
        let node = chain.namehash(name);
        chain.push_event(mint_transfer_event(node, A, block, 0));
        chain.push_event(new_uri_event(node, name, block, 1));
        node
    }

    // Test critique: scénario complet brad.crypto sur deux cycles
    #[tokio::test]
    async fn test_brad_crypto_two_cycles() {
        let (service, chain, repositories) = service(500);
        let node = mint(&chain, "brad.crypto", 1);
        chain.set_head(1);

        assert_eq!(
            service.run_cycle().await.unwrap(),
            CycleOutcome::Synced { from: 1, to: 1 }
        );

        let key_hash = KeyHash([0x4b; 32]);
        chain.set_resolver(node, Some(Address([0x30; 20])));
        chain.set_record(node, key_hash, "crypto.ETH.address", &A.to_hex());
        chain.push_event(sync_event(node, key_hash, 5, 0));
        chain.set_head(5);

        assert_eq!(
            service.run_cycle().await.unwrap(),
            CycleOutcome::Synced { from: 2, to: 5 }
        );

        let domain = repositories.domain("brad.crypto").unwrap();
        let resolution = domain.effective_resolution().unwrap();
        assert_eq!(resolution.owner, Some(A));
        assert_eq!(resolution.records.len(), 1);
        assert_eq!(resolution.records["crypto.ETH.address"], A.to_hex());
        assert_eq!(repositories.stored_events().len(), 3);
        assert_eq!(service.watermark().await.unwrap(), 5);
    }

    // Test critique: rejouer une plage déjà commitée ne crée aucun doublon
    #[tokio::test]
    async fn test_replaying_committed_range_is_idempotent() {
        let (service, chain, repositories) = service(500);
        let node = mint(&chain, "brad.crypto", 1);
        chain.push_event(transfer_event(node, A, Address([0xbb; 20]), 2, 0));
        chain.set_head(3);

        service.run_cycle().await.unwrap();
        let domain_before = repositories.domain("brad.crypto").unwrap();
        let events_before = repositories.stored_events();

        // Crash simulé: on réapplique la même plage
        service.sync_range(0, 3, 500).await.unwrap();

        assert_eq!(repositories.domain("brad.crypto").unwrap(), domain_before);
        assert_eq!(repositories.stored_events(), events_before);
        assert_eq!(repositories.domain_count(), 2); // brad.crypto + crypto
    }

    // Test critique: échec de stockage → même plage rejouée avec une page divisée par deux
    #[tokio::test]
    async fn test_storage_failure_retries_with_halved_page() {
        let (service, chain, repositories) = service(10);
        mint(&chain, "brad.crypto", 2);
        mint(&chain, "kirill.crypto", 8);
        chain.set_head(10);
        repositories.fail_next_persists(1);

        service.run_cycle().await.unwrap();

        assert_eq!(chain.queried_ranges(), vec![(1, 10), (1, 5), (6, 10)]);
        assert_eq!(repositories.persist_calls(), 3);
        // Chaque événement persisté exactement une fois, sans trou
        let blocks: Vec<u64> = repositories
            .stored_events()
            .iter()
            .map(|e| e.block_number)
            .collect();
        assert_eq!(blocks, vec![2, 2, 8, 8]);
        assert_eq!(repositories.cursor_block(service.chain_id()), Some(10));
        assert!(repositories.domain("kirill.crypto").is_some());
    }

    // Test critique: un chunk de queue plus court que la page est bien découpé
    #[tokio::test]
    async fn test_failing_tail_chunk_is_split_immediately() {
        let (service, chain, repositories) = service(8);
        chain.set_head(8);
        service.run_cycle().await.unwrap();

        mint(&chain, "brad.crypto", 10);
        chain.set_head(11);
        chain.fail_next_queries(1);
        service.run_cycle().await.unwrap();

        assert_eq!(
            chain.queried_ranges(),
            vec![(1, 8), (9, 11), (9, 9), (10, 10), (11, 11)]
        );
        assert!(repositories.domain("brad.crypto").is_some());
        assert_eq!(repositories.cursor_block(service.chain_id()), Some(11));
    }

    // Test critique: un nœud bloqué déclenche le timeout puis le découpage
    #[tokio::test(start_paused = true)]
    async fn test_hung_chunk_times_out_and_is_split() {
        let (service, chain, repositories) = service(4);
        mint(&chain, "brad.crypto", 3);
        chain.set_head(4);
        chain.hang_next_queries(1);

        let outcome = service.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Synced { from: 1, to: 4 });
        assert_eq!(chain.queried_ranges(), vec![(1, 4), (1, 2), (3, 4)]);
        assert_eq!(repositories.persist_calls(), 2);
        assert!(repositories.domain("brad.crypto").is_some());
    }

    // Seuls les événements nouvellement stockés sont comptés
    #[tokio::test]
    async fn test_replayed_chunk_inserts_nothing() {
        let (service, chain, repositories) = service(500);
        mint(&chain, "brad.crypto", 1);
        chain.set_head(3);

        assert_eq!(service.index_chunk(1, 3).await.unwrap(), 2);
        assert_eq!(service.index_chunk(1, 3).await.unwrap(), 0);
        assert_eq!(repositories.stored_events().len(), 2);
    }

    #[tokio::test]
    async fn test_single_block_retries_are_bounded() {
        let (service, chain, repositories) = service(1);
        chain.set_head(1);
        repositories.fail_next_persists(u32::MAX);

        let result = service.run_cycle().await;

        assert!(matches!(
            result,
            Err(IndexerError::RetriesExhausted { from: 1, to: 1, attempts: 2, .. })
        ));
        // Tentative initiale + 2 retries
        assert_eq!(repositories.persist_calls(), 3);
        assert_eq!(repositories.cursor_block(service.chain_id()), None);
    }

    #[tokio::test]
    async fn test_backoff_recovers_transient_failure() {
        let (service, chain, repositories) = service(2);
        mint(&chain, "brad.crypto", 2);
        chain.set_head(2);
        // page 2 échoue, puis bloc 1 échoue, puis tout passe
        chain.fail_next_queries(2);

        service.run_cycle().await.unwrap();

        assert_eq!(chain.queried_ranges(), vec![(1, 2), (1, 1), (1, 1), (2, 2)]);
        assert!(repositories.domain("brad.crypto").is_some());
    }

    // Test critique: tête confirmée derrière le watermark → erreur de config, pas de retry
    #[tokio::test]
    async fn test_head_behind_watermark_is_config_error() {
        let (service, chain, _repositories) = service(500);
        chain.set_head(10);
        service.run_cycle().await.unwrap();

        chain.set_head(7);
        let result = service.run_cycle().await;

        assert!(matches!(result, Err(IndexerError::ConfigError(_))));
        assert_eq!(chain.queried_ranges(), vec![(1, 10)]);
    }

    #[tokio::test]
    async fn test_caught_up_cycle_is_idle() {
        let (service, chain, _repositories) = service(500);
        chain.set_head(4);
        service.run_cycle().await.unwrap();

        assert_eq!(
            service.run_cycle().await.unwrap(),
            CycleOutcome::CaughtUp { watermark: 4 }
        );
        assert_eq!(chain.queried_ranges().len(), 1);
    }

    // Les chunks sans événements font quand même avancer le watermark
    #[tokio::test]
    async fn test_empty_chunks_advance_cursor() {
        let (service, chain, repositories) = service(3);
        chain.set_head(7);

        service.run_cycle().await.unwrap();

        assert_eq!(chain.queried_ranges(), vec![(1, 3), (4, 6), (7, 7)]);
        assert!(repositories.stored_events().is_empty());
        assert_eq!(service.watermark().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (service, chain, _repositories) = service(500);
        chain.set_head(2);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(async move { service.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(IndexerError::ShutdownRequested)));
    }
}
