//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Per-event projection errors (local, non-fatal)
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Chain RPC and contract call errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::models::Node;

// =============================================================================
// Domain Errors
// =============================================================================

/// Per-event projection errors.
///
/// These are the only errors the projector recovers from: the offending
/// event is logged and skipped, and the rest of the chunk carries on.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The event targets a domain that was never minted.
    #[error("Domain not found for node {0}")]
    DomainNotFound(Node),

    /// Events did not arrive in the order a mint requires.
    #[error("Unexpected order of events: {0}")]
    UnexpectedEventOrder(String),

    /// Hashing the minted URI does not reproduce the token id.
    #[error("Namehash mismatch for '{name}': expected {expected}, token is {actual}")]
    NamehashMismatch {
        /// Domain name carried by the NewURI event.
        name: String,
        /// Namehash of that name.
        expected: Node,
        /// Token id carried by the event.
        actual: Node,
    },

    /// Event arguments are missing or malformed.
    #[error("Invalid event arguments: {0}")]
    InvalidEventArgs(String),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
///
/// These errors originate from storage operations like queries,
/// transactions, and data serialization.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Chain RPC and contract call errors.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC endpoint could not be reached or configured.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// A log or call result could not be decoded.
    #[error("Decoding error: {0}")]
    DecodeError(String),

    /// The contract call reverted.
    ///
    /// Resolver lookups treat this as "record absent" rather than a failure.
    #[error("Execution reverted: {0}")]
    ExecutionReverted(String),

    /// A chunk did not complete within the configured timeout.
    #[error("Timeout processing blocks {from}..={to}")]
    Timeout {
        /// First block of the chunk.
        from: u64,
        /// Last block of the chunk.
        to: u64,
    },
}

impl ChainError {
    /// Whether this error is a contract revert.
    pub fn is_revert(&self) -> bool {
        matches!(self, ChainError::ExecutionReverted(_))
    }
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the main error type returned by [`crate::services::SyncService`].
/// It wraps all lower-level errors and adds sync-specific variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Per-event projection error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Chain connectivity or call error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Invalid configuration, including a confirmed head behind the watermark.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A single-block chunk kept failing after every retry.
    #[error("Retries exhausted for blocks {from}..={to} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// First block of the failing chunk.
        from: u64,
        /// Last block of the failing chunk.
        to: u64,
        /// Number of attempts made at the floor page size.
        attempts: u32,
        /// Message of the last error seen.
        last_error: String,
    },

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,
}

impl IndexerError {
    /// Whether a chunk failing with this error should be retried with a
    /// smaller range.
    pub fn is_chunk_retryable(&self) -> bool {
        !matches!(
            self,
            IndexerError::ConfigError(_)
                | IndexerError::ShutdownRequested
                | IndexerError::RetriesExhausted { .. }
        )
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
