//! Cursor repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use namesake_core::error::StorageResult;
use namesake_core::models::IndexerCursor;
use namesake_core::ports::CursorRepository;

use super::database::Database;
use super::helpers::query_error;

/// PostgreSQL implementation of CursorRepository.
pub struct PgCursorRepository {
    pool: PgPool,
}

impl PgCursorRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl CursorRepository for PgCursorRepository {
    async fn get_cursor(&self, chain_id: &str) -> StorageResult<Option<IndexerCursor>> {
        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            SELECT chain_id, last_indexed_block, updated_at
            FROM indexer_cursor
            WHERE chain_id = $1
            "#,
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.map(CursorRow::into_cursor))
    }
}

/// Move the cursor forward inside a chunk transaction. Never moves it back.
pub(super) async fn upsert_cursor(
    conn: &mut PgConnection,
    cursor: &IndexerCursor,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO indexer_cursor (chain_id, last_indexed_block, updated_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (chain_id) DO UPDATE SET
            last_indexed_block = GREATEST(indexer_cursor.last_indexed_block, EXCLUDED.last_indexed_block),
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&cursor.chain_id)
    .bind(cursor.last_indexed_block as i64)
    .bind(cursor.updated_at)
    .execute(conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    chain_id: String,
    last_indexed_block: i64,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl CursorRow {
    fn into_cursor(self) -> IndexerCursor {
        IndexerCursor {
            chain_id: self.chain_id,
            last_indexed_block: self.last_indexed_block as u64,
            updated_at: self.updated_at,
        }
    }
}
