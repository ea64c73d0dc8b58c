//! Projection of ordered registry events onto domain snapshots.
//!
//! Each handler takes the current snapshot of a domain and returns the next
//! one. Local errors ([`DomainError`]) skip the offending event; anything
//! else aborts the chunk.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, error, instrument, trace};

use crate::error::{DomainError, IndexerError, IndexerResult};
use crate::metrics::record_projection_error;
use crate::models::{Address, DomainSnapshot, KeyHash, Node, ParentDomain, Resolution, parent_name};
use crate::ports::{ChainAdapter, RawEvent, RegistryEventData, Repositories};
use crate::services::orderer::{MintStep, OrderedEvents};
use crate::services::resolver::ResolverRecordResolver;

/// Result of projecting one chunk.
#[derive(Debug, Default)]
pub struct Projection {
    /// Final snapshots of the domains the chunk changed, ordered by name.
    pub snapshots: Vec<DomainSnapshot>,
    /// Events skipped because of a local error.
    pub skipped: usize,
}

/// Applies ordered events to the per-chain state of each domain.
pub struct DomainProjector<C: ChainAdapter, R: Repositories> {
    chain: Arc<C>,
    repositories: Arc<R>,
    resolver: ResolverRecordResolver<C>,
}

impl<C: ChainAdapter, R: Repositories> DomainProjector<C, R> {
    pub fn new(chain: Arc<C>, repositories: Arc<R>) -> Self {
        Self {
            resolver: ResolverRecordResolver::new(chain.clone()),
            chain,
            repositories,
        }
    }

    /// Project a chunk. Mints run first and sequentially, then each
    /// domain's group runs concurrently with the others.
    #[instrument(skip_all, fields(mints = ordered.mints.len(), domains = ordered.latest.len()))]
    pub async fn project(&self, ordered: OrderedEvents) -> IndexerResult<Projection> {
        let mut working: HashMap<Node, DomainSnapshot> = HashMap::new();
        let mut skipped = 0;

        for step in &ordered.mints {
            let node = match step {
                MintStep::Mint { new_uri, .. } => new_uri.node(),
                MintStep::Transfer(event) | MintStep::OrphanUri(event) => event.node(),
            };
            let Some(node) = node else { continue };

            let current = self.load(&node, &working).await?;
            match self.apply_mint_step(current, step).await {
                Ok(next) => {
                    working.insert(node, next);
                }
                Err(IndexerError::Domain(e)) => {
                    skipped += 1;
                    Self::report_skipped(step_event(step), &e);
                }
                Err(e) => return Err(e),
            }
        }

        let groups = ordered
            .latest
            .iter()
            .map(|(node, events)| self.project_group(node, events, &working));
        let results = try_join_all(groups).await?;

        for (snapshot, group_skipped) in results {
            skipped += group_skipped;
            if let Some(snapshot) = snapshot {
                working.insert(snapshot.node, snapshot);
            }
        }

        let mut snapshots: Vec<DomainSnapshot> = working.into_values().collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(domains = snapshots.len(), skipped, "Projection complete");
        Ok(Projection { snapshots, skipped })
    }

    /// Replay one domain's retained events in chain order.
    async fn project_group(
        &self,
        node: &Node,
        events: &[RawEvent],
        working: &HashMap<Node, DomainSnapshot>,
    ) -> IndexerResult<(Option<DomainSnapshot>, usize)> {
        let mut current = self.load(node, working).await?;
        let mut changed = false;
        let mut skipped = 0;

        for event in events {
            trace!(node = %node, kind = %event.kind(), block = event.block_number, "Applying event");
            match self.apply(current.clone(), event).await {
                Ok(next) => {
                    current = Some(next);
                    changed = true;
                }
                Err(IndexerError::Domain(e)) => {
                    skipped += 1;
                    Self::report_skipped(event, &e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok((current.filter(|_| changed), skipped))
    }

    /// Current snapshot of a domain: this chunk's working copy, else storage.
    async fn load(
        &self,
        node: &Node,
        working: &HashMap<Node, DomainSnapshot>,
    ) -> IndexerResult<Option<DomainSnapshot>> {
        if let Some(snapshot) = working.get(node) {
            return Ok(Some(snapshot.clone()));
        }

        let domain = self.repositories.domains().find_by_node(node).await?;
        Ok(domain.map(|d| {
            d.snapshot_for(
                self.chain.blockchain(),
                self.chain.network_id(),
                self.chain.registry_address(),
            )
        }))
    }

    async fn apply_mint_step(
        &self,
        current: Option<DomainSnapshot>,
        step: &MintStep,
    ) -> IndexerResult<DomainSnapshot> {
        match step {
            MintStep::Mint { transfer, new_uri } => self.on_mint(current, transfer, new_uri),
            MintStep::Transfer(event) => self.apply(current, event).await,
            MintStep::OrphanUri(event) => Err(DomainError::UnexpectedEventOrder(format!(
                "NewURI at block {} log {} is not preceded by a mint Transfer",
                event.block_number, event.log_index
            ))
            .into()),
        }
    }

    /// Dispatch a non-mint event to its handler.
    async fn apply(
        &self,
        current: Option<DomainSnapshot>,
        event: &RawEvent,
    ) -> IndexerResult<DomainSnapshot> {
        match &event.data {
            RegistryEventData::Transfer { from, to, token_id } => {
                if from.is_zero() {
                    return Err(DomainError::UnexpectedEventOrder(format!(
                        "expected mint Transfer of {} to be followed by NewURI",
                        token_id
                    ))
                    .into());
                }
                let snapshot = current.ok_or(DomainError::DomainNotFound(*token_id))?;
                if to.is_zero() {
                    Ok(Self::on_burn(snapshot))
                } else {
                    self.on_transfer(snapshot, to.non_zero()).await
                }
            }
            RegistryEventData::Resolve { token_id, .. } => {
                let snapshot = current.ok_or(DomainError::DomainNotFound(*token_id))?;
                self.on_resolve(snapshot).await
            }
            RegistryEventData::Sync {
                update_id, token_id, ..
            } => {
                let snapshot = current.ok_or(DomainError::DomainNotFound(*token_id))?;
                self.on_sync(snapshot, update_id).await
            }
            RegistryEventData::NewUri { .. } => Err(DomainError::UnexpectedEventOrder(
                "NewURI outside of a mint sequence".to_string(),
            )
            .into()),
            RegistryEventData::Approval { .. }
            | RegistryEventData::ApprovalForAll { .. }
            | RegistryEventData::Unknown { .. } => current.ok_or_else(|| {
                DomainError::InvalidEventArgs(format!("{} does not change domains", event.kind()))
                    .into()
            }),
        }
    }

    /// Transfer(0x0 → owner) + NewURI(name): create the domain.
    ///
    /// Minting an already mirrored domain only moves ownership, so replaying
    /// a committed chunk is harmless.
    fn on_mint(
        &self,
        current: Option<DomainSnapshot>,
        transfer: &RawEvent,
        new_uri: &RawEvent,
    ) -> IndexerResult<DomainSnapshot> {
        let RegistryEventData::NewUri { token_id, uri } = &new_uri.data else {
            return Err(DomainError::InvalidEventArgs("mint without NewURI".into()).into());
        };

        let expected = self.chain.namehash(uri);
        if expected != *token_id {
            return Err(DomainError::NamehashMismatch {
                name: uri.clone(),
                expected,
                actual: *token_id,
            }
            .into());
        }

        let owner = match &transfer.data {
            RegistryEventData::Transfer {
                from,
                to,
                token_id: transferred,
            } if from.is_zero() && transferred == token_id => to.non_zero(),
            _ => {
                return Err(DomainError::UnexpectedEventOrder(format!(
                    "expected a mint Transfer of {} before NewURI, got {}",
                    token_id,
                    transfer.kind()
                ))
                .into());
            }
        };

        if let Some(mut snapshot) = current {
            snapshot.resolution.owner = owner;
            return Ok(snapshot);
        }

        let parent = parent_name(uri).map(|name| ParentDomain {
            name: name.to_string(),
            node: self.chain.namehash(name),
        });

        debug!(name = %uri, node = %token_id, "Domain minted");
        Ok(DomainSnapshot {
            name: uri.clone(),
            node: *token_id,
            parent,
            resolution: Resolution {
                owner,
                ..Resolution::unowned(
                    self.chain.blockchain(),
                    self.chain.network_id(),
                    self.chain.registry_address(),
                )
            },
        })
    }

    fn on_burn(mut snapshot: DomainSnapshot) -> DomainSnapshot {
        snapshot.resolution.owner = None;
        snapshot.resolution.resolver = None;
        snapshot.resolution.records.clear();
        snapshot
    }

    async fn on_transfer(
        &self,
        mut snapshot: DomainSnapshot,
        owner: Option<Address>,
    ) -> IndexerResult<DomainSnapshot> {
        snapshot.resolution.owner = owner;
        snapshot.resolution = self
            .resolver
            .refresh_resolver(&snapshot.node, snapshot.resolution)
            .await?;
        Ok(snapshot)
    }

    async fn on_resolve(&self, mut snapshot: DomainSnapshot) -> IndexerResult<DomainSnapshot> {
        snapshot.resolution = self
            .resolver
            .refresh_resolver(&snapshot.node, snapshot.resolution)
            .await?;
        Ok(snapshot)
    }

    async fn on_sync(
        &self,
        mut snapshot: DomainSnapshot,
        key_hash: &KeyHash,
    ) -> IndexerResult<DomainSnapshot> {
        let update = self.resolver.resolve(&snapshot.node, key_hash).await?;
        snapshot.resolution = update.apply(snapshot.resolution);
        Ok(snapshot)
    }

    fn report_skipped(event: &RawEvent, e: &DomainError) {
        error!(
            kind = %event.kind(),
            block = event.block_number,
            log_index = event.log_index,
            tx = %event.transaction_hash,
            error = %e,
            "❌ Failed to process event"
        );
        record_projection_error(event.kind().as_str());
    }
}

fn step_event(step: &MintStep) -> &RawEvent {
    match step {
        MintStep::Mint { new_uri, .. } => new_uri,
        MintStep::Transfer(event) | MintStep::OrphanUri(event) => event,
    }
}
