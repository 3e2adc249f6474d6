use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use banya_catalog::{RentalTier, Resource, ResourceKind, ResourceStatus};
use banya_core::repository::ResourceRepository;
use banya_core::{CoreError, CoreResult};

const RESOURCE_COLS: &str =
    "id, kind, number, tier, status, assigned_customer_id, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct ResourceRow {
    id: Uuid,
    kind: String,
    number: String,
    tier: String,
    status: String,
    assigned_customer_id: Option<Uuid>,
    updated_at: DateTime<Utc>,
}

impl ResourceRow {
    pub(crate) fn into_resource(self) -> CoreResult<Resource> {
        Ok(Resource {
            id: self.id,
            kind: self
                .kind
                .parse::<ResourceKind>()
                .map_err(CoreError::Internal)?,
            number: self.number,
            tier: self
                .tier
                .parse::<RentalTier>()
                .map_err(CoreError::Internal)?,
            status: self
                .status
                .parse::<ResourceStatus>()
                .map_err(CoreError::Internal)?,
            assigned_customer_id: self.assigned_customer_id,
            updated_at: self.updated_at,
        })
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("Database error: {}", e))
}

pub struct PgResourceRepository {
    pool: Pool<Postgres>,
}

impl PgResourceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceRepository for PgResourceRepository {
    async fn list(&self, kind: Option<ResourceKind>) -> CoreResult<Vec<Resource>> {
        let rows: Vec<ResourceRow> = match kind {
            Some(kind) => sqlx::query_as(&format!(
                "SELECT {} FROM resources WHERE kind = $1 ORDER BY number",
                RESOURCE_COLS
            ))
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?,
            None => sqlx::query_as(&format!(
                "SELECT {} FROM resources ORDER BY number",
                RESOURCE_COLS
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?,
        };

        rows.into_iter().map(ResourceRow::into_resource).collect()
    }

    async fn get(&self, id: Uuid) -> CoreResult<Resource> {
        let row: Option<ResourceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM resources WHERE id = $1",
            RESOURCE_COLS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| CoreError::NotFound(format!("Resource {} not found", id)))?
            .into_resource()
    }

    async fn set_status(&self, id: Uuid, status: ResourceStatus) -> CoreResult<Resource> {
        // Reaching CLEAN drops the previous occupant's binding and key.
        let row: Option<ResourceRow> = sqlx::query_as(&format!(
            "UPDATE resources
             SET status = $2,
                 assigned_customer_id = CASE WHEN $2 = 'CLEAN' THEN NULL ELSE assigned_customer_id END,
                 key_token = CASE WHEN $2 = 'CLEAN' THEN NULL ELSE key_token END,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            RESOURCE_COLS
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| CoreError::NotFound(format!("Resource {} not found", id)))?
            .into_resource()
    }

    async fn find_assignable(&self, tier: RentalTier) -> CoreResult<Option<Resource>> {
        let row: Option<ResourceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM resources
             WHERE tier = $1 AND status = 'CLEAN' AND assigned_customer_id IS NULL
             ORDER BY number
             LIMIT 1",
            RESOURCE_COLS
        ))
        .bind(tier.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(ResourceRow::into_resource).transpose()
    }
}
