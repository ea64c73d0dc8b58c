//! Port traits for the chain data source.
//!
//! These traits define how the sync services read registry logs and
//! resolver records from a chain. Implementations live in the
//! infrastructure layer (e.g., `namesake-evm`).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ChainResult;
use crate::models::{
    Address, BlockHash, Blockchain, KeyHash, Node, RegistryEvent, RegistryEventKind, TxHash,
};

// =============================================================================
// Raw Events
// =============================================================================

/// Decoded registry log arguments, one variant per event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEventData {
    /// ERC-721 transfer. `from == 0` is a mint, `to == 0` a burn.
    Transfer {
        from: Address,
        to: Address,
        token_id: Node,
    },
    /// Name assigned to a freshly minted token.
    NewUri { token_id: Node, uri: String },
    /// Resolver set for a token.
    Resolve { token_id: Node, to: Address },
    /// A resolver record changed; `update_id` is the hashed key.
    Sync {
        resolver: Address,
        update_id: KeyHash,
        token_id: Node,
    },
    Approval {
        owner: Address,
        approved: Address,
        token_id: Node,
    },
    ApprovalForAll {
        owner: Address,
        operator: Address,
        approved: bool,
    },
    /// Log emitted by the registry with a signature we do not decode.
    Unknown {
        /// Hex-encoded topics.
        topics: Vec<String>,
        /// Hex-encoded data.
        data: String,
    },
}

impl RegistryEventData {
    pub fn kind(&self) -> RegistryEventKind {
        match self {
            RegistryEventData::Transfer { .. } => RegistryEventKind::Transfer,
            RegistryEventData::NewUri { .. } => RegistryEventKind::NewUri,
            RegistryEventData::Resolve { .. } => RegistryEventKind::Resolve,
            RegistryEventData::Sync { .. } => RegistryEventKind::Sync,
            RegistryEventData::Approval { .. } => RegistryEventKind::Approval,
            RegistryEventData::ApprovalForAll { .. } => RegistryEventKind::ApprovalForAll,
            RegistryEventData::Unknown { .. } => RegistryEventKind::Unknown,
        }
    }

    /// Token (domain node) the event refers to.
    pub fn token_id(&self) -> Option<Node> {
        match self {
            RegistryEventData::Transfer { token_id, .. }
            | RegistryEventData::NewUri { token_id, .. }
            | RegistryEventData::Resolve { token_id, .. }
            | RegistryEventData::Sync { token_id, .. }
            | RegistryEventData::Approval { token_id, .. } => Some(*token_id),
            RegistryEventData::ApprovalForAll { .. } | RegistryEventData::Unknown { .. } => None,
        }
    }

    /// Arguments by their ABI names, uint256 values as 0x-prefixed hex.
    pub fn return_values(&self) -> HashMap<String, String> {
        let pairs: Vec<(&str, String)> = match self {
            RegistryEventData::Transfer { from, to, token_id } => vec![
                ("from", from.to_hex()),
                ("to", to.to_hex()),
                ("tokenId", token_id.to_hex()),
            ],
            RegistryEventData::NewUri { token_id, uri } => {
                vec![("tokenId", token_id.to_hex()), ("uri", uri.clone())]
            }
            RegistryEventData::Resolve { token_id, to } => {
                vec![("tokenId", token_id.to_hex()), ("to", to.to_hex())]
            }
            RegistryEventData::Sync {
                resolver,
                update_id,
                token_id,
            } => vec![
                ("resolver", resolver.to_hex()),
                ("updateId", update_id.to_hex()),
                ("tokenId", token_id.to_hex()),
            ],
            RegistryEventData::Approval {
                owner,
                approved,
                token_id,
            } => vec![
                ("owner", owner.to_hex()),
                ("approved", approved.to_hex()),
                ("tokenId", token_id.to_hex()),
            ],
            RegistryEventData::ApprovalForAll {
                owner,
                operator,
                approved,
            } => vec![
                ("owner", owner.to_hex()),
                ("operator", operator.to_hex()),
                ("approved", approved.to_string()),
            ],
            RegistryEventData::Unknown { topics, data } => vec![
                ("topics", topics.join(",")),
                ("data", data.clone()),
            ],
        };

        pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }
}

/// A registry log as returned by the chain, before ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub block_number: u64,
    pub block_hash: BlockHash,
    /// Index of the log within its block.
    pub log_index: u64,
    pub transaction_hash: TxHash,
    pub data: RegistryEventData,
}

impl RawEvent {
    pub fn kind(&self) -> RegistryEventKind {
        self.data.kind()
    }

    pub fn node(&self) -> Option<Node> {
        self.data.token_id()
    }

    /// Chain ordering key.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    /// Audit record persisted in the event store.
    pub fn to_record(&self, blockchain: Blockchain, network_id: u64) -> RegistryEvent {
        RegistryEvent {
            blockchain,
            network_id,
            kind: self.kind(),
            node: self.node(),
            block_number: self.block_number,
            block_hash: self.block_hash,
            log_index: self.log_index,
            transaction_hash: self.transaction_hash,
            return_values: self.data.return_values(),
        }
    }
}

/// Decoded resolver record for one key hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverRecord {
    pub key: String,
    pub value: String,
}

// =============================================================================
// Source Traits
// =============================================================================

/// Reads registry logs from a chain.
#[async_trait]
pub trait ChainEventSource: Send + Sync {
    /// Current chain head.
    async fn current_block_height(&self) -> ChainResult<u64>;

    /// All registry logs in `[from_block, to_block]`, in (block, log index) order.
    async fn query_events(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<RawEvent>>;
}

/// Contract calls against the registry and its resolvers.
#[async_trait]
pub trait RegistryReader: Send + Sync {
    /// Current resolver of a token, `None` when unset.
    async fn resolver_of(&self, node: &Node) -> ChainResult<Option<Address>>;

    /// Key and value stored under `key_hash` for a token.
    ///
    /// Fails with [`crate::error::ChainError::ExecutionReverted`] when the
    /// resolver call reverts.
    async fn record_by_hash(
        &self,
        resolver: &Address,
        key_hash: &KeyHash,
        node: &Node,
    ) -> ChainResult<ResolverRecord>;
}

/// One supported registry on one chain.
///
/// Bundles the log source, the contract calls and the naming scheme so the
/// sync service can be pointed at any registry by configuration.
pub trait ChainAdapter: ChainEventSource + RegistryReader {
    fn blockchain(&self) -> Blockchain;

    fn network_id(&self) -> u64;

    /// Registry contract whose logs are mirrored.
    fn registry_address(&self) -> Address;

    /// Registry-specific name hashing (token id of a name).
    fn namehash(&self, name: &str) -> Node;
}
