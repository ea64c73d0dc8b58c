use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::ChainResult;
use crate::ports::{ChainAdapter, RawEvent};

/// Pages registry logs out of the chain for a confirmed block range.
pub struct EventFetcher<C: ChainAdapter> {
    chain: Arc<C>,
}

impl<C: ChainAdapter> EventFetcher<C> {
    pub fn new(chain: Arc<C>) -> Self {
        Self { chain }
    }

    /// Every registry log in `[from_block, to_block]`, in (block, log index) order.
    ///
    /// Source errors are returned unchanged; retrying is up to the caller.
    #[instrument(skip(self))]
    pub async fn fetch(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<RawEvent>> {
        let mut events = self.chain.query_events(from_block, to_block).await?;
        events.sort_by_key(RawEvent::position);

        info!(
            count = events.len(),
            from = from_block,
            to = to_block,
            blocks = to_block - from_block + 1,
            "📥 Fetched registry events"
        );
        Ok(events)
    }
}
