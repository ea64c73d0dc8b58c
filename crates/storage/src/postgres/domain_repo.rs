//! Domain repository implementation for PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use namesake_core::error::StorageResult;
use namesake_core::models::{
    Address, Domain, DomainSnapshot, Node, ParentDomain, RecordMap, Resolution,
};
use namesake_core::ports::DomainRepository;

use super::helpers::{bytes_to_array, bytes_to_optional_array, parse_blockchain, query_error};

const DOMAIN_COLUMNS: &str = r#"
    d.id, d.name, d.node, p.name AS parent_name, p.node AS parent_node
"#;

// =============================================================================
// Repository Implementation
// =============================================================================

/// PostgreSQL implementation of DomainRepository.
pub struct PgDomainRepository {
    pool: PgPool,
}

impl PgDomainRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach resolutions to domain rows, keeping the row order.
    async fn with_resolutions(&self, rows: Vec<DomainRow>) -> StorageResult<Vec<Domain>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let resolution_rows = sqlx::query_as::<_, ResolutionRow>(
            r#"
            SELECT domain_id, blockchain, network_id, owner_address, resolver, registry, resolution
            FROM domain_resolutions
            WHERE domain_id = ANY($1)
            ORDER BY blockchain, network_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        let mut by_domain: HashMap<i64, Vec<Resolution>> = HashMap::new();
        for row in resolution_rows {
            let domain_id = row.domain_id;
            by_domain
                .entry(domain_id)
                .or_default()
                .push(row.into_resolution()?);
        }

        rows.into_iter()
            .map(|row| {
                let resolutions = by_domain.remove(&row.id).unwrap_or_default();
                row.into_domain(resolutions)
            })
            .collect()
    }

    async fn find_one(&self, filter: &str, value: Vec<u8>) -> StorageResult<Option<Domain>> {
        let sql = format!(
            "SELECT {} FROM domains d LEFT JOIN domains p ON p.id = d.parent_id WHERE {} = $1",
            DOMAIN_COLUMNS, filter
        );
        let row = sqlx::query_as::<_, DomainRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(self
            .with_resolutions(row.into_iter().collect())
            .await?
            .pop())
    }
}

#[async_trait]
impl DomainRepository for PgDomainRepository {
    async fn find_by_node(&self, node: &Node) -> StorageResult<Option<Domain>> {
        self.find_one("d.node", node.0.to_vec()).await
    }

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Domain>> {
        let sql = format!(
            "SELECT {} FROM domains d LEFT JOIN domains p ON p.id = d.parent_id WHERE d.name = $1",
            DOMAIN_COLUMNS
        );
        let row = sqlx::query_as::<_, DomainRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(self
            .with_resolutions(row.into_iter().collect())
            .await?
            .pop())
    }

    async fn list_by_owners(
        &self,
        owners: &[Address],
        tlds: &[String],
        limit: u32,
    ) -> StorageResult<Vec<Domain>> {
        if owners.is_empty() {
            return Ok(Vec::new());
        }

        let owners: Vec<Vec<u8>> = owners.iter().map(|a| a.0.to_vec()).collect();
        let sql = format!(
            r#"
            SELECT {}
            FROM domains d
            LEFT JOIN domains p ON p.id = d.parent_id
            WHERE EXISTS (
                SELECT 1 FROM domain_resolutions r
                WHERE r.domain_id = d.id AND r.owner_address = ANY($1)
            )
            AND (cardinality($2::TEXT[]) = 0 OR p.name = ANY($2))
            ORDER BY d.name
            LIMIT $3
            "#,
            DOMAIN_COLUMNS
        );
        let rows = sqlx::query_as::<_, DomainRow>(&sql)
            .bind(&owners)
            .bind(tlds)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        self.with_resolutions(rows).await
    }
}

// =============================================================================
// Chunk Writes
// =============================================================================

/// Upsert a domain row (and its parent) and return its id.
async fn upsert_domain(
    conn: &mut PgConnection,
    name: &str,
    node: &Node,
    parent_id: Option<i64>,
) -> StorageResult<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO domains (name, node, parent_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (node) DO UPDATE SET
            parent_id = COALESCE(EXCLUDED.parent_id, domains.parent_id),
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(&node.0[..])
    .bind(parent_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(id)
}

/// Write a domain snapshot inside a chunk transaction.
pub(super) async fn upsert_snapshot(
    conn: &mut PgConnection,
    snapshot: &DomainSnapshot,
) -> StorageResult<()> {
    let parent_id = match &snapshot.parent {
        Some(parent) => Some(upsert_domain(&mut *conn, &parent.name, &parent.node, None).await?),
        None => None,
    };
    let domain_id = upsert_domain(&mut *conn, &snapshot.name, &snapshot.node, parent_id).await?;

    let resolution = &snapshot.resolution;
    sqlx::query(
        r#"
        INSERT INTO domain_resolutions (
            domain_id, blockchain, network_id, owner_address, resolver, registry, resolution
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (domain_id, blockchain, network_id) DO UPDATE SET
            owner_address = EXCLUDED.owner_address,
            resolver = EXCLUDED.resolver,
            registry = EXCLUDED.registry,
            resolution = EXCLUDED.resolution,
            updated_at = NOW()
        "#,
    )
    .bind(domain_id)
    .bind(resolution.blockchain.as_str())
    .bind(resolution.network_id as i64)
    .bind(resolution.owner.map(|a| a.0.to_vec()))
    .bind(resolution.resolver.map(|a| a.0.to_vec()))
    .bind(&resolution.registry.0[..])
    .bind(Json(&resolution.records))
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct DomainRow {
    id: i64,
    name: String,
    node: Vec<u8>,
    parent_name: Option<String>,
    parent_node: Option<Vec<u8>>,
}

impl DomainRow {
    fn into_domain(self, resolutions: Vec<Resolution>) -> StorageResult<Domain> {
        let parent = match (self.parent_name, self.parent_node) {
            (Some(name), Some(node)) => Some(ParentDomain {
                name,
                node: Node(bytes_to_array(node, "domains.parent.node")?),
            }),
            _ => None,
        };

        Ok(Domain {
            name: self.name,
            node: Node(bytes_to_array(self.node, "domains.node")?),
            parent,
            resolutions,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResolutionRow {
    domain_id: i64,
    blockchain: String,
    network_id: i64,
    owner_address: Option<Vec<u8>>,
    resolver: Option<Vec<u8>>,
    registry: Vec<u8>,
    resolution: Json<RecordMap>,
}

impl ResolutionRow {
    fn into_resolution(self) -> StorageResult<Resolution> {
        Ok(Resolution {
            blockchain: parse_blockchain(&self.blockchain, "domain_resolutions.blockchain")?,
            network_id: self.network_id as u64,
            owner: bytes_to_optional_array(self.owner_address, "domain_resolutions.owner_address")?
                .map(Address),
            resolver: bytes_to_optional_array(self.resolver, "domain_resolutions.resolver")?
                .map(Address),
            registry: Address(bytes_to_array(self.registry, "domain_resolutions.registry")?),
            records: self.resolution.0,
        })
    }
}
