//! In-memory fakes of the port traits for service tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{ChainError, ChainResult, StorageError, StorageResult};
use crate::models::{
    Address, BlockHash, Blockchain, Domain, DomainSnapshot, IndexerCursor, KeyHash, Node,
    RegistryEvent, RegistryEventKind, Resolution, TxHash,
};
use crate::ports::{
    ChainAdapter, ChainEventSource, ChunkData, CursorRepository, DomainRepository, RawEvent,
    RegistryEventData, RegistryEventRepository, RegistryReader, Repositories, ResolverRecord,
};

// =============================================================================
// Event builders
// =============================================================================

pub(crate) fn raw_event(data: RegistryEventData, block: u64, log_index: u64) -> RawEvent {
    let mut tx = [0u8; 32];
    tx[..8].copy_from_slice(&block.to_be_bytes());
    tx[8..16].copy_from_slice(&log_index.to_be_bytes());

    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&block.to_be_bytes());

    RawEvent {
        block_number: block,
        block_hash: BlockHash(hash),
        log_index,
        transaction_hash: TxHash(tx),
        data,
    }
}

pub(crate) fn transfer_event(node: Node, from: Address, to: Address, block: u64, log: u64) -> RawEvent {
    raw_event(
        RegistryEventData::Transfer {
            from,
            to,
            token_id: node,
        },
        block,
        log,
    )
}

pub(crate) fn mint_transfer_event(node: Node, to: Address, block: u64, log: u64) -> RawEvent {
    transfer_event(node, Address::ZERO, to, block, log)
}

pub(crate) fn new_uri_event(node: Node, uri: &str, block: u64, log: u64) -> RawEvent {
    raw_event(
        RegistryEventData::NewUri {
            token_id: node,
            uri: uri.to_string(),
        },
        block,
        log,
    )
}

pub(crate) fn resolve_event(node: Node, block: u64, log: u64) -> RawEvent {
    raw_event(
        RegistryEventData::Resolve {
            token_id: node,
            to: Address([0x30; 20]),
        },
        block,
        log,
    )
}

pub(crate) fn sync_event(node: Node, key_hash: KeyHash, block: u64, log: u64) -> RawEvent {
    raw_event(
        RegistryEventData::Sync {
            resolver: Address([0x30; 20]),
            update_id: key_hash,
            token_id: node,
        },
        block,
        log,
    )
}

pub(crate) fn approval_event(node: Node, owner: Address, approved: Address, block: u64, log: u64) -> RawEvent {
    raw_event(
        RegistryEventData::Approval {
            owner,
            approved,
            token_id: node,
        },
        block,
        log,
    )
}

// =============================================================================
// FakeChain
// =============================================================================

/// Scriptable chain: a list of logs, a head, resolvers and records.
pub(crate) struct FakeChain {
    head: AtomicU64,
    events: Mutex<Vec<RawEvent>>,
    queried: Mutex<Vec<(u64, u64)>>,
    resolvers: Mutex<HashMap<Node, Address>>,
    records: Mutex<HashMap<(Node, KeyHash), ResolverRecord>>,
    reverting: Mutex<HashSet<KeyHash>>,
    record_failure: Mutex<Option<String>>,
    query_failures: AtomicU32,
    query_hangs: AtomicU32,
}

impl FakeChain {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicU64::new(0),
            events: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
            resolvers: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            reverting: Mutex::new(HashSet::new()),
            record_failure: Mutex::new(None),
            query_failures: AtomicU32::new(0),
            query_hangs: AtomicU32::new(0),
        }
    }

    pub(crate) fn set_head(&self, block: u64) {
        self.head.store(block, Ordering::SeqCst);
    }

    pub(crate) fn push_event(&self, event: RawEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Ranges passed to `query_events`, in call order.
    pub(crate) fn queried_ranges(&self) -> Vec<(u64, u64)> {
        self.queried.lock().unwrap().clone()
    }

    pub(crate) fn set_resolver(&self, node: Node, resolver: Option<Address>) {
        let mut resolvers = self.resolvers.lock().unwrap();
        match resolver {
            Some(address) => resolvers.insert(node, address),
            None => resolvers.remove(&node),
        };
    }

    pub(crate) fn set_record(&self, node: Node, key_hash: KeyHash, key: &str, value: &str) {
        self.records.lock().unwrap().insert(
            (node, key_hash),
            ResolverRecord {
                key: key.to_string(),
                value: value.to_string(),
            },
        );
    }

    pub(crate) fn set_reverting(&self, key_hash: KeyHash) {
        self.reverting.lock().unwrap().insert(key_hash);
    }

    /// Make every non-reverting record call fail with an RPC error.
    pub(crate) fn fail_record_calls(&self, message: &str) {
        *self.record_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Fail the next `count` log queries.
    pub(crate) fn fail_next_queries(&self, count: u32) {
        self.query_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` log queries never return.
    pub(crate) fn hang_next_queries(&self, count: u32) {
        self.query_hangs.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainEventSource for FakeChain {
    async fn current_block_height(&self) -> ChainResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn query_events(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<RawEvent>> {
        self.queried.lock().unwrap().push((from_block, to_block));

        let failing = self
            .query_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChainError::RpcError("query limit exceeded".into()));
        }

        let hanging = self
            .query_hangs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hanging {
            std::future::pending::<()>().await;
        }

        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.block_number))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RegistryReader for FakeChain {
    async fn resolver_of(&self, node: &Node) -> ChainResult<Option<Address>> {
        Ok(self.resolvers.lock().unwrap().get(node).copied())
    }

    async fn record_by_hash(
        &self,
        _resolver: &Address,
        key_hash: &KeyHash,
        node: &Node,
    ) -> ChainResult<ResolverRecord> {
        if self.reverting.lock().unwrap().contains(key_hash) {
            return Err(ChainError::ExecutionReverted("execution reverted".into()));
        }
        if let Some(message) = self.record_failure.lock().unwrap().clone() {
            return Err(ChainError::RpcError(message));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(*node, *key_hash))
            .cloned()
            .unwrap_or(ResolverRecord {
                key: String::new(),
                value: String::new(),
            }))
    }
}

impl ChainAdapter for FakeChain {
    fn blockchain(&self) -> Blockchain {
        Blockchain::Eth
    }

    fn network_id(&self) -> u64 {
        1
    }

    fn registry_address(&self) -> Address {
        Address([0xee; 20])
    }

    /// Deterministic stand-in for a real namehash.
    fn namehash(&self, name: &str) -> Node {
        let mut out = [0u8; 32];
        for (i, byte) in name.bytes().enumerate() {
            let slot = &mut out[i % 32];
            *slot = slot.wrapping_mul(31).wrapping_add(byte);
        }
        out[31] ^= name.len() as u8;
        Node(out)
    }
}

// =============================================================================
// MemoryRepositories
// =============================================================================

#[derive(Default)]
struct MemoryState {
    domains: BTreeMap<Node, Domain>,
    events: Vec<RegistryEvent>,
    cursors: HashMap<String, IndexerCursor>,
}

/// Transactional in-memory store: a chunk either lands whole or not at all.
pub(crate) struct MemoryRepositories {
    state: Mutex<MemoryState>,
    persist_failures: AtomicU32,
    persist_calls: AtomicU32,
}

impl MemoryRepositories {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            persist_failures: AtomicU32::new(0),
            persist_calls: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` chunk commits.
    pub(crate) fn fail_next_persists(&self, count: u32) {
        self.persist_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn persist_calls(&self) -> u32 {
        self.persist_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stored_events(&self) -> Vec<RegistryEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub(crate) fn domain(&self, name: &str) -> Option<Domain> {
        self.state
            .lock()
            .unwrap()
            .domains
            .values()
            .find(|d| d.name == name)
            .cloned()
    }

    pub(crate) fn domain_count(&self) -> usize {
        self.state.lock().unwrap().domains.len()
    }

    pub(crate) fn cursor_block(&self, chain_id: &str) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .cursors
            .get(chain_id)
            .map(|c| c.last_indexed_block)
    }

    /// Write snapshots without going through a chunk.
    pub(crate) fn store_snapshots(&self, snapshots: &[DomainSnapshot]) {
        let mut state = self.state.lock().unwrap();
        for snapshot in snapshots {
            upsert_snapshot(&mut state, snapshot);
        }
    }
}

fn upsert_snapshot(state: &mut MemoryState, snapshot: &DomainSnapshot) {
    if let Some(parent) = &snapshot.parent {
        state.domains.entry(parent.node).or_insert_with(|| Domain {
            name: parent.name.clone(),
            node: parent.node,
            parent: None,
            resolutions: Vec::new(),
        });
    }

    let domain = state.domains.entry(snapshot.node).or_insert_with(|| Domain {
        name: snapshot.name.clone(),
        node: snapshot.node,
        parent: None,
        resolutions: Vec::new(),
    });
    domain.parent = snapshot.parent.clone().or(domain.parent.take());

    let incoming: &Resolution = &snapshot.resolution;
    domain
        .resolutions
        .retain(|r| !(r.blockchain == incoming.blockchain && r.network_id == incoming.network_id));
    domain.resolutions.push(incoming.clone());
}

#[async_trait]
impl DomainRepository for MemoryRepositories {
    async fn find_by_node(&self, node: &Node) -> StorageResult<Option<Domain>> {
        Ok(self.state.lock().unwrap().domains.get(node).cloned())
    }

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Domain>> {
        Ok(self.domain(name))
    }

    async fn list_by_owners(
        &self,
        owners: &[Address],
        tlds: &[String],
        limit: u32,
    ) -> StorageResult<Vec<Domain>> {
        let state = self.state.lock().unwrap();
        let mut domains: Vec<Domain> = state
            .domains
            .values()
            .filter(|d| {
                d.resolutions
                    .iter()
                    .any(|r| r.owner.is_some_and(|o| owners.contains(&o)))
            })
            .filter(|d| {
                tlds.is_empty()
                    || d.parent.as_ref().is_some_and(|p| tlds.contains(&p.name))
            })
            .cloned()
            .collect();
        domains.sort_by(|a, b| a.name.cmp(&b.name));
        domains.truncate(limit as usize);
        Ok(domains)
    }
}

#[async_trait]
impl RegistryEventRepository for MemoryRepositories {
    async fn latest_block(
        &self,
        blockchain: Blockchain,
        network_id: u64,
    ) -> StorageResult<Option<u64>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.blockchain == blockchain && e.network_id == network_id)
            .map(|e| e.block_number)
            .max())
    }

    async fn latest_transfers(&self, node: &Node) -> StorageResult<Vec<RegistryEvent>> {
        let state = self.state.lock().unwrap();
        let mut latest: BTreeMap<Blockchain, RegistryEvent> = BTreeMap::new();
        for event in state
            .events
            .iter()
            .filter(|e| e.kind == RegistryEventKind::Transfer && e.node.as_ref() == Some(node))
        {
            let newer = latest.get(&event.blockchain).is_none_or(|current| {
                (event.block_number, event.log_index) > (current.block_number, current.log_index)
            });
            if newer {
                latest.insert(event.blockchain, event.clone());
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn list_for_node(&self, node: &Node) -> StorageResult<Vec<RegistryEvent>> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<RegistryEvent> = state
            .events
            .iter()
            .filter(|e| e.node.as_ref() == Some(node))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }
}

#[async_trait]
impl CursorRepository for MemoryRepositories {
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>> {
        Ok(self.state.lock().unwrap().cursors.get(chain_id).cloned())
    }
}

#[async_trait]
impl Repositories for MemoryRepositories {
    fn domains(&self) -> &dyn DomainRepository {
        self
    }

    fn events(&self) -> &dyn RegistryEventRepository {
        self
    }

    fn cursor(&self) -> &dyn CursorRepository {
        self
    }

    async fn persist_chunk_atomic(&self, data: ChunkData<'_>) -> StorageResult<u64> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .persist_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::TransactionError("connection lost".into()));
        }

        let mut state = self.state.lock().unwrap();
        for snapshot in data.domains {
            upsert_snapshot(&mut state, snapshot);
        }
        let mut inserted = 0;
        for event in data.events {
            let exists = state.events.iter().any(|e| {
                e.blockchain == event.blockchain
                    && e.transaction_hash == event.transaction_hash
                    && e.log_index == event.log_index
            });
            if !exists {
                state.events.push(event.clone());
                inserted += 1;
            }
        }
        let cursor = state
            .cursors
            .entry(data.cursor.chain_id.clone())
            .or_insert_with(|| data.cursor.clone());
        cursor.last_indexed_block = cursor.last_indexed_block.max(data.cursor.last_indexed_block);
        cursor.updated_at = data.cursor.updated_at;
        Ok(inserted)
    }
}
