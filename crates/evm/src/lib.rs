//! EVM RPC adapter for the namesake registry mirror.
//!
//! This crate implements the chain ports from `namesake-core`
//! ([`ChainEventSource`], [`RegistryReader`], [`ChainAdapter`]) for a CNS
//! registry deployed on an EVM chain, over HTTP JSON-RPC.
//!
//! # Features
//!
//! - Registry log queries by block range, decoded with `sol!` bindings
//! - Resolver contract calls with revert detection
//! - EIP-137 namehash for NewURI validation
//!
//! # Usage
//!
//! ```ignore
//! use namesake_evm::{EvmClient, EvmClientConfig};
//!
//! let client = EvmClient::connect(EvmClientConfig {
//!     rpc_url: "https://mainnet.infura.io/v3/<key>".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let head = client.current_block_height().await?;
//! let events = client.query_events(head - 10, head).await?;
//! ```
//!
//! [`ChainEventSource`]: namesake_core::ports::ChainEventSource
//! [`RegistryReader`]: namesake_core::ports::RegistryReader
//! [`ChainAdapter`]: namesake_core::ports::ChainAdapter

mod client;
mod contracts;
mod namehash;

pub use client::{EvmClient, EvmClientConfig, is_execution_reverted};
pub use namehash::eip137_namehash;
