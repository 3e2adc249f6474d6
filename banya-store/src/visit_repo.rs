use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use banya_catalog::{rental_base_cents, RentalTier, ResourceKind};
use banya_core::repository::VisitRepository;
use banya_core::{CoreError, CoreResult};
use banya_visit::{
    ActiveVisitSummary, BlockKind, Customer, OccupancyBlock, RenewalKind, ResourceRef, Visit,
    VisitAggregate, VisitError,
};

use crate::app_config::BusinessRules;
use crate::audit::add_audit_change;
use crate::customer_repo::{CustomerRow, CUSTOMER_COLS};

pub(crate) const BLOCK_COLS: &str = "id, visit_id, kind, tier, resource_kind, resource_id, \
     starts_at, ends_at, agreement_signed, lane_session_id, created_at";

#[derive(sqlx::FromRow)]
pub(crate) struct BlockRow {
    id: Uuid,
    visit_id: Uuid,
    kind: String,
    tier: String,
    resource_kind: String,
    resource_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    agreement_signed: bool,
    lane_session_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl BlockRow {
    pub(crate) fn into_block(self) -> CoreResult<OccupancyBlock> {
        let resource = match self
            .resource_kind
            .parse::<ResourceKind>()
            .map_err(CoreError::Internal)?
        {
            ResourceKind::Room => ResourceRef::Room(self.resource_id),
            ResourceKind::Locker => ResourceRef::Locker(self.resource_id),
        };

        Ok(OccupancyBlock {
            id: self.id,
            visit_id: self.visit_id,
            kind: self.kind.parse::<BlockKind>().map_err(CoreError::Internal)?,
            tier: self.tier.parse::<RentalTier>().map_err(CoreError::Internal)?,
            resource,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            agreement_signed: self.agreement_signed,
            lane_session_id: self.lane_session_id,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct VisitRow {
    pub(crate) id: Uuid,
    pub(crate) customer_id: Uuid,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
}

impl From<VisitRow> for Visit {
    fn from(r: VisitRow) -> Self {
        Visit {
            id: r.id,
            customer_id: r.customer_id,
            started_at: r.started_at,
            ended_at: r.ended_at,
        }
    }
}

pub(crate) fn visit_err(e: VisitError) -> CoreError {
    match e {
        VisitError::Banned { .. } => CoreError::Forbidden(e.to_string()),
        VisitError::CeilingExceeded | VisitError::InvalidRenewal(_) => {
            CoreError::Validation(e.to_string())
        }
        VisitError::FinalExtensionAlreadyUsed(_) | VisitError::VisitEnded(_) => {
            CoreError::Conflict(e.to_string())
        }
        VisitError::NoBlocks => CoreError::Internal(e.to_string()),
    }
}

pub(crate) fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("Database error: {}", e))
}

pub(crate) fn new_key_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Price for the extra hours of a RENEWAL block: the tier's hourly rate
/// past the six-hour package.
fn renewal_cents(tier: RentalTier, hours: i64) -> i32 {
    let hourly = rental_base_cents(tier, 7) - rental_base_cents(tier, 6);
    hourly * hours as i32
}

pub struct PgVisitRepository {
    pool: Pool<Postgres>,
    rules: BusinessRules,
}

impl PgVisitRepository {
    pub fn new(pool: Pool<Postgres>, rules: BusinessRules) -> Self {
        Self { pool, rules }
    }

    pub(crate) async fn load_aggregate(
        conn: &mut sqlx::PgConnection,
        visit_id: Uuid,
    ) -> CoreResult<Option<VisitAggregate>> {
        let visit: Option<VisitRow> = sqlx::query_as(
            "SELECT id, customer_id, started_at, ended_at FROM visits WHERE id = $1",
        )
        .bind(visit_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        let Some(visit) = visit else {
            return Ok(None);
        };

        let rows: Vec<BlockRow> = sqlx::query_as(&format!(
            "SELECT {} FROM checkin_blocks WHERE visit_id = $1 ORDER BY starts_at",
            BLOCK_COLS
        ))
        .bind(visit_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;

        let blocks = rows
            .into_iter()
            .map(BlockRow::into_block)
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(Some(VisitAggregate::from_parts(visit.into(), blocks)))
    }

    async fn insert_block(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        block: &OccupancyBlock,
    ) -> CoreResult<()> {
        let (resource_kind, resource_id) = match block.resource {
            ResourceRef::Room(id) => (ResourceKind::Room, id),
            ResourceRef::Locker(id) => (ResourceKind::Locker, id),
        };

        sqlx::query(
            "INSERT INTO checkin_blocks
             (id, visit_id, kind, tier, resource_kind, resource_id, starts_at, ends_at,
              agreement_signed, lane_session_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(block.id)
        .bind(block.visit_id)
        .bind(block.kind.as_str())
        .bind(block.tier.as_str())
        .bind(resource_kind.as_str())
        .bind(resource_id)
        .bind(block.starts_at)
        .bind(block.ends_at)
        .bind(block.agreement_signed)
        .bind(block.lane_session_id)
        .bind(block.created_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn add_charge(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        customer_id: Uuid,
        visit_id: Uuid,
        description: &str,
        amount_cents: i32,
    ) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO charges (customer_id, visit_id, description, amount_cents)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(customer_id)
        .bind(visit_id)
        .bind(description)
        .bind(amount_cents)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait]
impl VisitRepository for PgVisitRepository {
    async fn open_initial(
        &self,
        customer_id: Uuid,
        tier: RentalTier,
        lane_session_id: Option<Uuid>,
    ) -> CoreResult<ActiveVisitSummary> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // 1. Lock the customer row; the ban check must see committed state.
        let customer: Option<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM customers WHERE id = $1 FOR UPDATE",
            CUSTOMER_COLS
        ))
        .bind(customer_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let customer: Customer = customer
            .ok_or_else(|| CoreError::NotFound(format!("Customer {} not found", customer_id)))?
            .into();

        // 2. Grab a clean resource of the tier. SKIP LOCKED keeps two lanes
        // checking in at once from fighting over the same room.
        let resource: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, kind FROM resources
             WHERE tier = $1 AND status = 'CLEAN' AND assigned_customer_id IS NULL
             ORDER BY number
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(tier.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let (resource_id, kind) = resource.ok_or_else(|| {
            CoreError::Conflict(format!("No clean {} available", tier.as_str()))
        })?;
        let resource_ref = match kind.parse::<ResourceKind>().map_err(CoreError::Internal)? {
            ResourceKind::Room => ResourceRef::Room(resource_id),
            ResourceKind::Locker => ResourceRef::Locker(resource_id),
        };

        // 3. Open the visit with its initial block.
        let agg = VisitAggregate::open_initial(&customer, tier, resource_ref, lane_session_id, now)
            .map_err(visit_err)?;

        sqlx::query("INSERT INTO visits (id, customer_id, started_at) VALUES ($1, $2, $3)")
            .bind(agg.visit.id)
            .bind(agg.visit.customer_id)
            .bind(agg.visit.started_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let block = agg.active_block().map_err(visit_err)?;
        Self::insert_block(&mut tx, block).await?;

        // 4. Occupy the resource and cut a fresh key token.
        sqlx::query(
            "UPDATE resources
             SET status = 'OCCUPIED', assigned_customer_id = $2, key_token = $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(resource_id)
        .bind(customer_id)
        .bind(new_key_token())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // 5. Post the package charge.
        let amount = rental_base_cents(tier, block.duration_hours());
        Self::add_charge(
            &mut tx,
            customer_id,
            agg.visit.id,
            &format!("{} ({}h)", tier.as_str(), block.duration_hours()),
            amount,
        )
        .await?;

        add_audit_change(
            &mut *tx,
            "register",
            "visit.open",
            "visit",
            Some(agg.visit.id),
            None,
            Some(json!({"tier": tier.as_str(), "block_id": block.id})),
        )
        .await
        .map_err(db_err)?;

        let summary = agg.summary().map_err(visit_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(summary)
    }

    async fn renew(&self, visit_id: Uuid, kind: RenewalKind) -> CoreResult<ActiveVisitSummary> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Serialize concurrent renewals of the same visit.
        sqlx::query("SELECT id FROM visits WHERE id = $1 FOR UPDATE")
            .bind(visit_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut agg = Self::load_aggregate(&mut *tx, visit_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Visit {} not found", visit_id)))?;

        let before_end = agg.checkout_at().map_err(visit_err)?;
        let block = agg.renew(kind, now).map_err(visit_err)?.clone();
        Self::insert_block(&mut tx, &block).await?;

        let (description, amount) = match kind {
            RenewalKind::Hours(hours) => (
                format!("{} renewal ({}h)", block.tier.as_str(), hours),
                renewal_cents(block.tier, hours),
            ),
            RenewalKind::FinalExtension => (
                "Final extension (2h)".to_string(),
                self.rules.final_extension_fee_cents,
            ),
        };
        Self::add_charge(&mut tx, agg.visit.customer_id, visit_id, &description, amount).await?;

        add_audit_change(
            &mut *tx,
            "register",
            "visit.renew",
            "visit",
            Some(visit_id),
            Some(json!({"checkout_at": before_end})),
            Some(json!({"checkout_at": block.ends_at, "kind": block.kind.as_str()})),
        )
        .await
        .map_err(db_err)?;

        let summary = agg.summary().map_err(visit_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(summary)
    }

    async fn get_aggregate(&self, visit_id: Uuid) -> CoreResult<VisitAggregate> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::load_aggregate(&mut conn, visit_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Visit {} not found", visit_id)))
    }

    async fn get_block(&self, block_id: Uuid) -> CoreResult<OccupancyBlock> {
        let row: Option<BlockRow> = sqlx::query_as(&format!(
            "SELECT {} FROM checkin_blocks WHERE id = $1",
            BLOCK_COLS
        ))
        .bind(block_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| CoreError::NotFound(format!("Block {} not found", block_id)))?
            .into_block()
    }

    async fn sign_agreement(&self, block_id: Uuid) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE checkin_blocks SET agreement_signed = TRUE WHERE id = $1",
        )
        .bind(block_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Block {} not found", block_id)));
        }

        // Mirror onto the originating lane session while it is still open.
        sqlx::query(
            "UPDATE lane_sessions SET agreement_signed = TRUE, updated_at = NOW()
             WHERE status = 'ACTIVE'
               AND id = (SELECT lane_session_id FROM checkin_blocks WHERE id = $1)",
        )
        .bind(block_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn active_by_membership(
        &self,
        membership_number: &str,
    ) -> CoreResult<Vec<ActiveVisitSummary>> {
        let visit_ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT v.id FROM visits v
             JOIN customers c ON c.id = v.customer_id
             WHERE c.membership_number = $1 AND v.ended_at IS NULL
             ORDER BY v.started_at",
        )
        .bind(membership_number)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let mut summaries = Vec::with_capacity(visit_ids.len());
        for (visit_id,) in visit_ids {
            if let Some(agg) = Self::load_aggregate(&mut conn, visit_id).await? {
                summaries.push(agg.summary().map_err(visit_err)?);
            }
        }
        Ok(summaries)
    }
}
