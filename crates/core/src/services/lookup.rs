//! Read-side lookups over the mirrored registry.

use std::sync::Arc;

use serde::Serialize;

use crate::error::StorageResult;
use crate::models::{Address, Domain, RegistryEvent, Resolution};
use crate::ports::Repositories;

/// Upper bound on one owner listing.
pub const MAX_LIST_LIMIT: u32 = 200;

/// A mirrored domain with its event trail.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainReport {
    pub domain: Domain,
    /// Resolution served to readers (child chain first while owned).
    pub effective_resolution: Option<Resolution>,
    /// Latest Transfer per blockchain.
    pub latest_transfers: Vec<RegistryEvent>,
    /// Every stored event of the domain, oldest first.
    pub history: Vec<RegistryEvent>,
}

/// Queries the storage boundary the way the read API does.
pub struct DomainLookup<R: Repositories> {
    repositories: Arc<R>,
}

impl<R: Repositories> DomainLookup<R> {
    pub fn new(repositories: Arc<R>) -> Self {
        Self { repositories }
    }

    /// Report for one domain, `None` when it is not mirrored.
    pub async fn report(&self, name: &str) -> StorageResult<Option<DomainReport>> {
        let Some(domain) = self.repositories.domains().find_by_name(name).await? else {
            return Ok(None);
        };

        let events = self.repositories.events();
        let latest_transfers = events.latest_transfers(&domain.node).await?;
        let history = events.list_for_node(&domain.node).await?;

        Ok(Some(DomainReport {
            effective_resolution: domain.effective_resolution().cloned(),
            domain,
            latest_transfers,
            history,
        }))
    }

    /// Domains owned by any of `owners`, optionally restricted to some TLDs.
    ///
    /// TLDs are compared lowercase and `limit` is clamped to
    /// [1, `MAX_LIST_LIMIT`].
    pub async fn owned_by(
        &self,
        owners: &[Address],
        tlds: &[String],
        limit: u32,
    ) -> StorageResult<Vec<Domain>> {
        if owners.is_empty() {
            return Ok(Vec::new());
        }

        let tlds: Vec<String> = tlds.iter().map(|t| t.to_ascii_lowercase()).collect();
        self.repositories
            .domains()
            .list_by_owners(owners, &tlds, limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Blockchain, DomainSnapshot, Node, ParentDomain};
    use crate::ports::{ChainAdapter, ChunkData};
    use crate::services::testing::{
        FakeChain, MemoryRepositories, mint_transfer_event, new_uri_event, transfer_event,
    };

    const A: Address = Address([0xaa; 20]);
    const B: Address = Address([0xbb; 20]);

    fn snapshot(chain: &FakeChain, name: &str, tld: &str, owner: Address) -> DomainSnapshot {
        let mut resolution = Resolution::unowned(Blockchain::Eth, 1, chain.registry_address());
        resolution.owner = Some(owner);
        DomainSnapshot {
            name: name.to_string(),
            node: chain.namehash(name),
            parent: Some(ParentDomain {
                name: tld.to_string(),
                node: chain.namehash(tld),
            }),
            resolution,
        }
    }

    fn setup() -> (FakeChain, Arc<MemoryRepositories>) {
        let chain = FakeChain::new();
        let repositories = Arc::new(MemoryRepositories::new());
        repositories.store_snapshots(&[
            snapshot(&chain, "brad.crypto", "crypto", A),
            snapshot(&chain, "kirill.crypto", "crypto", B),
            snapshot(&chain, "alice.wallet", "wallet", A),
            snapshot(&chain, "zed.crypto", "crypto", A),
        ]);
        (chain, repositories)
    }

    #[tokio::test]
    async fn test_owned_by_sorts_by_name() {
        let (_chain, repositories) = setup();
        let lookup = DomainLookup::new(repositories);

        let names: Vec<String> = lookup
            .owned_by(&[A], &[], 10)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();

        assert_eq!(names, vec!["alice.wallet", "brad.crypto", "zed.crypto"]);
    }

    // Test critique: le filtre TLD porte sur le nom du parent
    #[tokio::test]
    async fn test_owned_by_filters_tlds() {
        let (_chain, repositories) = setup();
        let lookup = DomainLookup::new(repositories);

        let names: Vec<String> = lookup
            .owned_by(&[A, B], &["CRYPTO".to_string()], 10)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();

        assert_eq!(names, vec!["brad.crypto", "kirill.crypto", "zed.crypto"]);
    }

    #[tokio::test]
    async fn test_owned_by_limit_and_empty_owners() {
        let (_chain, repositories) = setup();
        let lookup = DomainLookup::new(repositories);

        assert_eq!(lookup.owned_by(&[A], &[], 0).await.unwrap().len(), 1);
        assert_eq!(lookup.owned_by(&[A], &[], 2).await.unwrap().len(), 2);
        assert!(lookup.owned_by(&[], &[], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_includes_history_and_latest_transfer() {
        let chain = FakeChain::new();
        let repositories = Arc::new(MemoryRepositories::new());
        let node: Node = chain.namehash("brad.crypto");
        let events: Vec<_> = [
            mint_transfer_event(node, A, 1, 0),
            new_uri_event(node, "brad.crypto", 1, 1),
            transfer_event(node, A, B, 4, 0),
        ]
        .iter()
        .map(|e| e.to_record(Blockchain::Eth, 1))
        .collect();
        let cursor = crate::models::IndexerCursor {
            chain_id: "ETH:1".to_string(),
            last_indexed_block: 4,
            updated_at: chrono::Utc::now(),
        };
        repositories
            .persist_chunk_atomic(ChunkData {
                domains: &[snapshot(&chain, "brad.crypto", "crypto", B)],
                events: &events,
                cursor: &cursor,
            })
            .await
            .unwrap();
        let lookup = DomainLookup::new(repositories);

        let report = lookup.report("brad.crypto").await.unwrap().unwrap();

        assert_eq!(report.history.len(), 3);
        assert_eq!(report.latest_transfers.len(), 1);
        assert_eq!(report.latest_transfers[0].block_number, 4);
        assert_eq!(report.effective_resolution.unwrap().owner, Some(B));
        assert!(lookup.report("nobody.crypto").await.unwrap().is_none());
    }
}
