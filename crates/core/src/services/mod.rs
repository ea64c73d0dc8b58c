//! Sync services: fetching, ordering, projection and orchestration, plus
//! read-side lookups.

mod fetcher;
mod indexer;
mod lookup;
mod orderer;
mod projector;
mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use fetcher::EventFetcher;
pub use indexer::{CycleOutcome, SyncConfig, SyncService};
pub use lookup::{DomainLookup, DomainReport, MAX_LIST_LIMIT};
pub use orderer::{EventOrderer, MintStep, OrderedEvents};
pub use projector::{DomainProjector, Projection};
pub use resolver::{RecordChange, RecordUpdate, ResolverRecordResolver};
