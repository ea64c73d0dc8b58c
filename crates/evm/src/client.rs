//! EVM JSON-RPC client for the CNS registry.

use alloy::primitives::{self, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, instrument, trace, warn};

use namesake_core::error::{ChainError, ChainResult};
use namesake_core::metrics::record_decode_error;
use namesake_core::models::{Address, BlockHash, Blockchain, KeyHash, Node, TxHash};
use namesake_core::ports::{
    ChainAdapter, ChainEventSource, RawEvent, RegistryEventData, RegistryReader, ResolverRecord,
};

use crate::contracts::{CnsRegistry, CnsResolver};
use crate::namehash::eip137_namehash;

/// Configuration for the EVM client.
#[derive(Debug, Clone)]
pub struct EvmClientConfig {
    /// HTTP JSON-RPC URL.
    pub rpc_url: String,
    pub blockchain: Blockchain,
    /// EIP-155 chain id; checked against the node on connect.
    pub network_id: u64,
    /// Registry contract to mirror.
    pub registry_address: Address,
}

impl Default for EvmClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            blockchain: Blockchain::Eth,
            network_id: 1,
            // Mainnet CNS registry
            registry_address: Address([
                0xd1, 0xe5, 0xb0, 0xff, 0x12, 0x87, 0xaa, 0x9f, 0x9a, 0x26, 0x87, 0x59, 0x06,
                0x2e, 0x4a, 0xb0, 0x8b, 0x9d, 0xac, 0xbe,
            ]),
        }
    }
}

/// EVM adapter implementing the chain ports for one CNS registry.
pub struct EvmClient {
    provider: RootProvider<Http<Client>>,
    config: EvmClientConfig,
}

impl EvmClient {
    /// Connect to a node and check it serves the configured network.
    #[instrument(skip_all, fields(url = %config.rpc_url, chain = %config.blockchain))]
    pub async fn connect(config: EvmClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let url: url::Url = config
            .rpc_url
            .parse()
            .map_err(|e| ChainError::ConnectionFailed(format!("invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().on_http(url);

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        if chain_id != config.network_id {
            return Err(ChainError::ConnectionFailed(format!(
                "node serves chain id {}, expected network id {}",
                chain_id, config.network_id
            )));
        }

        debug!(chain_id, "Connected successfully");

        Ok(Self { provider, config })
    }

    fn registry(&self) -> primitives::Address {
        to_alloy_address(&self.config.registry_address)
    }
}

#[async_trait]
impl ChainEventSource for EvmClient {
    async fn current_block_height(&self) -> ChainResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))
    }

    async fn query_events(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<RawEvent>> {
        let filter = Filter::new()
            .address(self.registry())
            .from_block(from_block)
            .to_block(to_block);

        let logs: Vec<Log> = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        trace!(count = logs.len(), from_block, to_block, "Logs received");
        logs.iter().map(decode_log).collect()
    }
}

#[async_trait]
impl RegistryReader for EvmClient {
    async fn resolver_of(&self, node: &Node) -> ChainResult<Option<Address>> {
        let registry = CnsRegistry::new(self.registry(), self.provider.clone());

        match registry.resolverOf(node_to_u256(node)).call().await {
            Ok(result) => Ok(from_alloy_address(result._0).non_zero()),
            // Burned or never minted tokens revert
            Err(e) if is_execution_reverted(&e.to_string()) => Ok(None),
            Err(e) => Err(ChainError::RpcError(e.to_string())),
        }
    }

    async fn record_by_hash(
        &self,
        resolver: &Address,
        key_hash: &KeyHash,
        node: &Node,
    ) -> ChainResult<ResolverRecord> {
        let contract = CnsResolver::new(to_alloy_address(resolver), self.provider.clone());

        let result = contract
            .getByHash(U256::from_be_bytes(key_hash.0), node_to_u256(node))
            .call()
            .await
            .map_err(|e| call_error(e.to_string()))?;

        Ok(ResolverRecord {
            key: result.key,
            value: result.value,
        })
    }
}

impl ChainAdapter for EvmClient {
    fn blockchain(&self) -> Blockchain {
        self.config.blockchain
    }

    fn network_id(&self) -> u64 {
        self.config.network_id
    }

    fn registry_address(&self) -> Address {
        self.config.registry_address
    }

    fn namehash(&self, name: &str) -> Node {
        eip137_namehash(name)
    }
}

// =============================================================================
// Log decoding helpers
// =============================================================================

/// Whether an RPC error message reports a contract revert.
pub fn is_execution_reverted(message: &str) -> bool {
    message.to_ascii_lowercase().contains("execution reverted")
}

fn call_error(message: String) -> ChainError {
    if is_execution_reverted(&message) {
        ChainError::ExecutionReverted(message)
    } else {
        ChainError::RpcError(message)
    }
}

/// Decode an RPC log into a raw registry event.
fn decode_log(log: &Log) -> ChainResult<RawEvent> {
    let missing = |field: &str| ChainError::DecodeError(format!("log missing {}", field));

    Ok(RawEvent {
        block_number: log.block_number.ok_or_else(|| missing("block_number"))?,
        block_hash: BlockHash(log.block_hash.ok_or_else(|| missing("block_hash"))?.0),
        log_index: log.log_index.ok_or_else(|| missing("log_index"))?,
        transaction_hash: TxHash(
            log.transaction_hash
                .ok_or_else(|| missing("transaction_hash"))?
                .0,
        ),
        data: decode_event_data(&log.inner),
    })
}

/// Decode log arguments. Logs that fail to decode are kept as `Unknown`.
fn decode_event_data(log: &primitives::Log) -> RegistryEventData {
    match try_decode_event_data(log) {
        Ok(Some(data)) => data,
        Ok(None) => unknown_event(log),
        Err((kind, e)) => {
            warn!(kind, error = %e, "⚠️  Failed to decode registry log");
            record_decode_error(kind, "log");
            unknown_event(log)
        }
    }
}

type DecodeFailure = (&'static str, alloy::sol_types::Error);

fn try_decode_event_data(
    log: &primitives::Log,
) -> Result<Option<RegistryEventData>, DecodeFailure> {
    let Some(topic0) = log.topics().first().copied() else {
        return Ok(None);
    };

    let data = if topic0 == CnsRegistry::Transfer::SIGNATURE_HASH {
        let event = CnsRegistry::Transfer::decode_log(log, true).map_err(|e| ("Transfer", e))?;
        RegistryEventData::Transfer {
            from: from_alloy_address(event.data.from),
            to: from_alloy_address(event.data.to),
            token_id: u256_to_node(event.data.tokenId),
        }
    } else if topic0 == CnsRegistry::NewURI::SIGNATURE_HASH {
        let event = CnsRegistry::NewURI::decode_log(log, true).map_err(|e| ("NewURI", e))?;
        RegistryEventData::NewUri {
            token_id: u256_to_node(event.data.tokenId),
            uri: event.data.uri,
        }
    } else if topic0 == CnsRegistry::Resolve::SIGNATURE_HASH {
        let event = CnsRegistry::Resolve::decode_log(log, true).map_err(|e| ("Resolve", e))?;
        RegistryEventData::Resolve {
            token_id: u256_to_node(event.data.tokenId),
            to: from_alloy_address(event.data.to),
        }
    } else if topic0 == CnsRegistry::Sync::SIGNATURE_HASH {
        let event = CnsRegistry::Sync::decode_log(log, true).map_err(|e| ("Sync", e))?;
        RegistryEventData::Sync {
            resolver: from_alloy_address(event.data.resolver),
            update_id: KeyHash(event.data.updateId.to_be_bytes::<32>()),
            token_id: u256_to_node(event.data.tokenId),
        }
    } else if topic0 == CnsRegistry::Approval::SIGNATURE_HASH {
        let event = CnsRegistry::Approval::decode_log(log, true).map_err(|e| ("Approval", e))?;
        RegistryEventData::Approval {
            owner: from_alloy_address(event.data.owner),
            approved: from_alloy_address(event.data.approved),
            token_id: u256_to_node(event.data.tokenId),
        }
    } else if topic0 == CnsRegistry::ApprovalForAll::SIGNATURE_HASH {
        let event = CnsRegistry::ApprovalForAll::decode_log(log, true)
            .map_err(|e| ("ApprovalForAll", e))?;
        RegistryEventData::ApprovalForAll {
            owner: from_alloy_address(event.data.owner),
            operator: from_alloy_address(event.data.operator),
            approved: event.data.approved,
        }
    } else {
        return Ok(None);
    };

    Ok(Some(data))
}

fn unknown_event(log: &primitives::Log) -> RegistryEventData {
    RegistryEventData::Unknown {
        topics: log.topics().iter().map(|t| t.to_string()).collect(),
        data: log.data.data.to_string(),
    }
}

fn u256_to_node(value: U256) -> Node {
    Node(value.to_be_bytes::<32>())
}

fn node_to_u256(node: &Node) -> U256 {
    U256::from_be_bytes(node.0)
}

fn from_alloy_address(address: primitives::Address) -> Address {
    Address(address.0.0)
}

fn to_alloy_address(address: &Address) -> primitives::Address {
    primitives::Address::from(address.0)
}
