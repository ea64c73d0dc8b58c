//! Core domain layer for the namesake registry mirror.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! sync services that mirror an on-chain domain-name registry into a
//! relational store. It follows hexagonal architecture principles - this is
//! the innermost layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     namesake (binary)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │        namesake-evm          │       namesake-storage       │
//! │     (chain adapter, RPC)     │        (PostgreSQL)          │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                     namesake-core  ← YOU ARE HERE           │
//! │               (models, ports, services)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Domain, Resolution, RegistryEvent, etc.)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Fetcher, orderer, projector, resolver lookups and the sync loop
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Sync Cycle
//!
//! 1. Compute the confirmed block range from the watermark and chain head
//! 2. Fetch registry logs for one chunk of that range
//! 3. Order them: mint pairs first, then the latest event per type per domain
//! 4. Project the ordered events onto per-chain domain snapshots
//! 5. Persist snapshots, raw events and the cursor in one transaction
//! 6. On failure, retry the same range with half the page size

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;
