//! Resolver lookups with revert-as-empty semantics.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ChainResult;
use crate::metrics::record_resolver_revert;
use crate::models::{Address, KeyHash, Node, Resolution};
use crate::ports::ChainAdapter;

/// What a Sync event does to a resolution's record map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    /// Merge one key/value pair.
    Set { key: String, value: String },
    /// Drop every record.
    Clear,
    /// Leave records as they are.
    Unchanged,
}

/// Outcome of resolving one key hash for a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    /// Resolver currently set on the registry.
    pub resolver: Option<Address>,
    pub change: RecordChange,
}

impl RecordUpdate {
    /// Apply the update to a resolution, returning the next value.
    pub fn apply(self, mut resolution: Resolution) -> Resolution {
        resolution.resolver = self.resolver;
        match self.change {
            RecordChange::Set { key, value } => {
                resolution.records.insert(key, value);
            }
            RecordChange::Clear => resolution.records.clear(),
            RecordChange::Unchanged => {}
        }
        resolution
    }
}

/// Fetches resolver addresses and decoded records from the chain.
pub struct ResolverRecordResolver<C: ChainAdapter> {
    chain: Arc<C>,
}

impl<C: ChainAdapter> ResolverRecordResolver<C> {
    pub fn new(chain: Arc<C>) -> Self {
        Self { chain }
    }

    /// Re-read the resolver of a domain.
    ///
    /// An unset resolver drops the records; a changed one keeps them until
    /// the next Sync.
    pub async fn refresh_resolver(
        &self,
        node: &Node,
        resolution: Resolution,
    ) -> ChainResult<Resolution> {
        let resolver = self.chain.resolver_of(node).await?;
        let change = if resolver.is_none() {
            RecordChange::Clear
        } else {
            RecordChange::Unchanged
        };

        Ok(RecordUpdate { resolver, change }.apply(resolution))
    }

    /// Resolve the record stored under `key_hash` for a domain.
    ///
    /// The zero key hash and an unset resolver both clear the records. A
    /// reverted resolver call means the record is absent and also clears
    /// them; any other call failure is returned.
    pub async fn resolve(&self, node: &Node, key_hash: &KeyHash) -> ChainResult<RecordUpdate> {
        let resolver = self.chain.resolver_of(node).await?;

        let Some(resolver_address) = resolver.filter(|_| !key_hash.is_zero()) else {
            debug!(node = %node, "No resolver or reset key, clearing records");
            return Ok(RecordUpdate {
                resolver,
                change: RecordChange::Clear,
            });
        };

        let change = match self
            .chain
            .record_by_hash(&resolver_address, key_hash, node)
            .await
        {
            Ok(record) if record.key.is_empty() => {
                warn!(
                    node = %node,
                    key_hash = %key_hash,
                    resolver = %resolver_address,
                    "⚠️  Resolver returned no key for hash, records left unchanged"
                );
                RecordChange::Unchanged
            }
            Ok(record) => RecordChange::Set {
                key: record.key,
                value: record.value,
            },
            Err(e) if e.is_revert() => {
                debug!(node = %node, key_hash = %key_hash, "Resolver call reverted, clearing records");
                record_resolver_revert();
                RecordChange::Clear
            }
            Err(e) => return Err(e),
        };

        Ok(RecordUpdate { resolver, change })
    }
}
