//! Domain models representing the mirrored registry state.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// Fixed-size byte newtypes
// =============================================================================

/// Macro to generate fixed-size byte newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix)
/// - `to_hex()` - Convert to lowercase 0x-prefixed hex string
/// - `is_zero()` - All-zero check (null address, "0" key hash, ...)
/// - `Display` and hex-string `Serialize`/`Deserialize`
/// - `From<[u8; N]>` implementation
macro_rules! fixed_bytes_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Length of the value in bytes.
            pub const LEN: usize = $len;

            /// The all-zero value.
            pub const ZERO: Self = Self([0u8; $len]);

            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to lowercase 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Whether every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes_newtype!(
    /// Namehash of a domain name; also the registry token id.
    Node, 32
);

fixed_bytes_newtype!(
    /// Hashed resolver record key (the `updateId` of a Sync event).
    KeyHash, 32
);

fixed_bytes_newtype!(
    /// 32-byte block hash.
    BlockHash, 32
);

fixed_bytes_newtype!(
    /// 32-byte transaction hash.
    TxHash, 32
);

fixed_bytes_newtype!(
    /// 20-byte EVM account or contract address.
    Address, 20
);

impl Address {
    /// Map the null address to `None`.
    pub fn non_zero(self) -> Option<Self> {
        if self.is_zero() { None } else { Some(self) }
    }
}

// =============================================================================
// Chains
// =============================================================================

/// Blockchains the mirror knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Blockchain {
    /// Ethereum (L1).
    Eth,
    /// Polygon, the child chain of Ethereum.
    Matic,
    /// Zilliqa (no child chain).
    Zil,
}

impl Blockchain {
    /// Canonical upper-case tag used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Blockchain::Eth => "ETH",
            Blockchain::Matic => "MATIC",
            Blockchain::Zil => "ZIL",
        }
    }

    /// The L1 this chain settles to, if it is a child chain.
    pub fn parent_chain(&self) -> Option<Blockchain> {
        match self {
            Blockchain::Matic => Some(Blockchain::Eth),
            Blockchain::Eth | Blockchain::Zil => None,
        }
    }

    /// Whether this chain is an L2.
    pub fn is_child_chain(&self) -> bool {
        self.parent_chain().is_some()
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Blockchain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ETH" => Ok(Blockchain::Eth),
            "MATIC" => Ok(Blockchain::Matic),
            "ZIL" => Ok(Blockchain::Zil),
            _ => Err(format!(
                "Invalid blockchain '{}'. Use 'ETH', 'MATIC' or 'ZIL'.",
                s
            )),
        }
    }
}

/// Cursor key for a (blockchain, network id) pair, e.g. `ETH:1`.
pub fn chain_id(blockchain: Blockchain, network_id: u64) -> String {
    format!("{}:{}", blockchain, network_id)
}

// =============================================================================
// Domains & Resolutions
// =============================================================================

/// Resolver records: key → value. Ordering is irrelevant.
pub type RecordMap = BTreeMap<String, String>;

/// Per-chain view of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub blockchain: Blockchain,
    pub network_id: u64,
    /// `None` means unregistered or burned on this chain.
    pub owner: Option<Address>,
    pub resolver: Option<Address>,
    pub registry: Address,
    pub records: RecordMap,
}

impl Resolution {
    /// An empty, unowned resolution for a chain.
    pub fn unowned(blockchain: Blockchain, network_id: u64, registry: Address) -> Self {
        Self {
            blockchain,
            network_id,
            owner: None,
            resolver: None,
            registry,
            records: RecordMap::new(),
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }
}

/// Reference to a domain's parent (its TLD for second-level names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentDomain {
    pub name: String,
    pub node: Node,
}

/// Mirrored domain with all of its per-chain resolutions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Full name, e.g. `brad.crypto`.
    pub name: String,
    /// Namehash of `name`.
    pub node: Node,
    pub parent: Option<ParentDomain>,
    /// At most one entry per (blockchain, network id).
    pub resolutions: Vec<Resolution>,
}

impl Domain {
    /// Resolution for a specific chain.
    pub fn resolution_for(&self, blockchain: Blockchain, network_id: u64) -> Option<&Resolution> {
        self.resolutions
            .iter()
            .find(|r| r.blockchain == blockchain && r.network_id == network_id)
    }

    /// Resolution the read side should serve.
    ///
    /// A child-chain resolution wins while it has an owner; otherwise the
    /// L1 resolution is used. Chains without a child chain have a single
    /// resolution which is returned as-is.
    pub fn effective_resolution(&self) -> Option<&Resolution> {
        let child = self.resolutions.iter().find(|r| r.blockchain.is_child_chain());
        let root = self.resolutions.iter().find(|r| !r.blockchain.is_child_chain());

        match (root, child) {
            (_, Some(child)) if child.is_owned() => Some(child),
            (Some(root), _) => Some(root),
            (None, child) => child,
        }
    }

    /// Per-chain snapshot used by the projector.
    pub fn snapshot_for(
        &self,
        blockchain: Blockchain,
        network_id: u64,
        registry: Address,
    ) -> DomainSnapshot {
        let resolution = self
            .resolution_for(blockchain, network_id)
            .cloned()
            .unwrap_or_else(|| Resolution::unowned(blockchain, network_id, registry));

        DomainSnapshot {
            name: self.name.clone(),
            node: self.node,
            parent: self.parent.clone(),
            resolution,
        }
    }
}

/// Name of the parent domain: everything after the first label.
pub fn parent_name(name: &str) -> Option<&str> {
    name.split_once('.')
        .map(|(_, parent)| parent)
        .filter(|parent| !parent.is_empty())
}

/// Immutable per-chain state of one domain inside a chunk.
///
/// Event handlers take a snapshot by value and return the next one; the
/// chunk transaction writes the final snapshots back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub name: String,
    pub node: Node,
    pub parent: Option<ParentDomain>,
    pub resolution: Resolution,
}

// =============================================================================
// Registry Events
// =============================================================================

/// Registry log types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryEventKind {
    Transfer,
    #[serde(rename = "NewURI")]
    NewUri,
    Resolve,
    Sync,
    Approval,
    ApprovalForAll,
    /// A log whose signature the registry ABI does not describe.
    Unknown,
}

impl RegistryEventKind {
    /// Tag stored in `registry_events.type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryEventKind::Transfer => "Transfer",
            RegistryEventKind::NewUri => "NewURI",
            RegistryEventKind::Resolve => "Resolve",
            RegistryEventKind::Sync => "Sync",
            RegistryEventKind::Approval => "Approval",
            RegistryEventKind::ApprovalForAll => "ApprovalForAll",
            RegistryEventKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RegistryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Transfer" => Ok(RegistryEventKind::Transfer),
            "NewURI" => Ok(RegistryEventKind::NewUri),
            "Resolve" => Ok(RegistryEventKind::Resolve),
            "Sync" => Ok(RegistryEventKind::Sync),
            "Approval" => Ok(RegistryEventKind::Approval),
            "ApprovalForAll" => Ok(RegistryEventKind::ApprovalForAll),
            "Unknown" => Ok(RegistryEventKind::Unknown),
            other => Err(format!("Unknown registry event type '{}'", other)),
        }
    }
}

/// Append-only audit record of a registry log.
///
/// Unique on (blockchain, transaction_hash, log_index); never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub blockchain: Blockchain,
    pub network_id: u64,
    pub kind: RegistryEventKind,
    /// Token the event refers to, when it has one.
    pub node: Option<Node>,
    pub block_number: u64,
    pub block_hash: BlockHash,
    pub log_index: u64,
    pub transaction_hash: TxHash,
    /// Event arguments by name; uint256 values as 0x-prefixed hex.
    pub return_values: HashMap<String, String>,
}

// =============================================================================
// Indexer State
// =============================================================================

/// Indexer cursor tracking progress.
///
/// Records the last block of the last committed chunk for each chain, so
/// ranges without registry events still move the watermark forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerCursor {
    /// Chain identifier (see [`chain_id`]).
    pub chain_id: String,
    /// Last fully indexed block number.
    pub last_indexed_block: u64,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
