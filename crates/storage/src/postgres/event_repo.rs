//! Registry event repository implementation for PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use namesake_core::error::{StorageError, StorageResult};
use namesake_core::models::{BlockHash, Blockchain, Node, RegistryEvent, TxHash};
use namesake_core::ports::RegistryEventRepository;

use super::helpers::{bytes_to_array, bytes_to_optional_array, parse_blockchain, query_error};

// =============================================================================
// Repository Implementation
// =============================================================================

/// PostgreSQL implementation of RegistryEventRepository.
pub struct PgRegistryEventRepository {
    pool: PgPool,
}

impl PgRegistryEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistryEventRepository for PgRegistryEventRepository {
    async fn latest_block(
        &self,
        blockchain: Blockchain,
        network_id: u64,
    ) -> StorageResult<Option<u64>> {
        let row: (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT MAX(block_number)
            FROM registry_events
            WHERE blockchain = $1 AND network_id = $2
            "#,
        )
        .bind(blockchain.as_str())
        .bind(network_id as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.0.map(|n| n as u64))
    }

    async fn latest_transfers(&self, node: &Node) -> StorageResult<Vec<RegistryEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT DISTINCT ON (blockchain)
                   blockchain, network_id, type, node, block_number, block_hash,
                   log_index, transaction_hash, return_values
            FROM registry_events
            WHERE node = $1 AND type = 'Transfer'
            ORDER BY blockchain, block_number DESC, log_index DESC
            "#,
        )
        .bind(&node.0[..])
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    async fn list_for_node(&self, node: &Node) -> StorageResult<Vec<RegistryEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT blockchain, network_id, type, node, block_number, block_hash,
                   log_index, transaction_hash, return_values
            FROM registry_events
            WHERE node = $1
            ORDER BY block_number ASC, log_index ASC
            "#,
        )
        .bind(&node.0[..])
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter().map(EventRow::into_event).collect()
    }
}

/// Insert events inside a chunk transaction, skipping ones already stored.
pub(super) async fn insert_events(
    conn: &mut PgConnection,
    events: &[RegistryEvent],
) -> StorageResult<u64> {
    let mut inserted = 0;

    for event in events {
        let result = sqlx::query(
            r#"
            INSERT INTO registry_events (
                blockchain, network_id, type, node, block_number, block_hash,
                log_index, transaction_hash, return_values
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (blockchain, transaction_hash, log_index) DO NOTHING
            "#,
        )
        .bind(event.blockchain.as_str())
        .bind(event.network_id as i64)
        .bind(event.kind.as_str())
        .bind(event.node.as_ref().map(|n| n.0.to_vec()))
        .bind(event.block_number as i64)
        .bind(&event.block_hash.0[..])
        .bind(event.log_index as i64)
        .bind(&event.transaction_hash.0[..])
        .bind(Json(&event.return_values))
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;

        inserted += result.rows_affected();
    }

    Ok(inserted)
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct EventRow {
    blockchain: String,
    network_id: i64,
    #[sqlx(rename = "type")]
    kind: String,
    node: Option<Vec<u8>>,
    block_number: i64,
    block_hash: Vec<u8>,
    log_index: i64,
    transaction_hash: Vec<u8>,
    return_values: Json<HashMap<String, String>>,
}

impl EventRow {
    fn into_event(self) -> StorageResult<RegistryEvent> {
        Ok(RegistryEvent {
            blockchain: parse_blockchain(&self.blockchain, "registry_events.blockchain")?,
            network_id: self.network_id as u64,
            kind: self
                .kind
                .parse()
                .map_err(StorageError::SerializationError)?,
            node: bytes_to_optional_array(self.node, "registry_events.node")?.map(Node),
            block_number: self.block_number as u64,
            block_hash: BlockHash(bytes_to_array(self.block_hash, "registry_events.block_hash")?),
            log_index: self.log_index as u64,
            transaction_hash: TxHash(bytes_to_array(
                self.transaction_hash,
                "registry_events.transaction_hash",
            )?),
            return_values: self.return_values.0,
        })
    }
}
