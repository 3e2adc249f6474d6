use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use banya_catalog::pricing::LATE_BAN_DAYS;
use banya_catalog::RentalTier;
use banya_core::repository::CheckoutRepository;
use banya_core::{CoreError, CoreResult};
use banya_visit::checkout::RequestStatus;
use banya_visit::{CheckoutOutcome, CheckoutRequest, KeyResolution, ResourceRef, Settlement};

use crate::audit::add_audit_change;
use crate::app_config::BusinessRules;
use crate::visit_repo::{db_err, BlockRow, BLOCK_COLS};

const REQUEST_COLS: &str = "id, block_id, visit_id, status, checklist, claimed_by, \
     claim_expires_at, items_confirmed, fee_paid, late_minutes, fee_cents, ban_applied, \
     created_at, completed_at";

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    block_id: Uuid,
    visit_id: Uuid,
    status: String,
    checklist: serde_json::Value,
    claimed_by: Option<String>,
    claim_expires_at: Option<DateTime<Utc>>,
    items_confirmed: bool,
    fee_paid: bool,
    late_minutes: i64,
    fee_cents: i32,
    ban_applied: bool,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl RequestRow {
    fn into_request(self) -> CoreResult<CheckoutRequest> {
        Ok(CheckoutRequest {
            id: self.id,
            block_id: self.block_id,
            visit_id: self.visit_id,
            status: self
                .status
                .parse::<RequestStatus>()
                .map_err(CoreError::Internal)?,
            checklist: self.checklist,
            claimed_by: self.claimed_by,
            claim_expires_at: self.claim_expires_at,
            items_confirmed: self.items_confirmed,
            fee_paid: self.fee_paid,
            late_minutes: self.late_minutes,
            fee_cents: self.fee_cents,
            ban_applied: self.ban_applied,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResolutionRow {
    block_id: Uuid,
    visit_id: Uuid,
    customer_id: Uuid,
    customer_name: String,
    tier: String,
    resource_kind: String,
    resource_id: Uuid,
    checkout_at: DateTime<Utc>,
}

impl ResolutionRow {
    fn into_resolution(self, now: DateTime<Utc>) -> CoreResult<KeyResolution> {
        let resource = match self.resource_kind.as_str() {
            "ROOM" => ResourceRef::Room(self.resource_id),
            "LOCKER" => ResourceRef::Locker(self.resource_id),
            other => {
                return Err(CoreError::Internal(format!(
                    "Unknown resource kind: {}",
                    other
                )))
            }
        };

        Ok(KeyResolution {
            block_id: self.block_id,
            visit_id: self.visit_id,
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            tier: self
                .tier
                .parse::<RentalTier>()
                .map_err(CoreError::Internal)?,
            resource,
            checkout_at: self.checkout_at,
            settlement: Settlement::settle(self.checkout_at, now),
        })
    }
}

pub struct PgCheckoutRepository {
    pool: Pool<Postgres>,
    rules: BusinessRules,
}

impl PgCheckoutRepository {
    pub fn new(pool: Pool<Postgres>, rules: BusinessRules) -> Self {
        Self { pool, rules }
    }

    async fn fetch_request(&self, request_id: Uuid) -> CoreResult<CheckoutRequest> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {} FROM checkout_requests WHERE id = $1",
            REQUEST_COLS
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| {
            CoreError::NotFound(format!("Checkout request {} not found", request_id))
        })?
        .into_request()
    }

    /// Zero-row conditional update on a claimed step: work out which rule
    /// the caller tripped.
    async fn explain_claim_miss(&self, request_id: Uuid, staff: &str) -> CoreError {
        let request = match self.fetch_request(request_id).await {
            Ok(r) => r,
            Err(e) => return e,
        };
        if request.status != RequestStatus::Open {
            return CoreError::Conflict(format!(
                "Checkout request {} is not open",
                request_id
            ));
        }
        match (&request.claimed_by, request.claim_expires_at) {
            (Some(holder), Some(expires)) if holder != staff && expires > Utc::now() => {
                CoreError::Conflict(format!(
                    "Checkout request {} is already claimed by {}",
                    request_id, holder
                ))
            }
            _ => CoreError::Validation(format!(
                "Checkout request {} has not been claimed",
                request_id
            )),
        }
    }
}

#[async_trait]
impl CheckoutRepository for PgCheckoutRepository {
    async fn resolve_key(&self, key_token: &str) -> CoreResult<KeyResolution> {
        let row: Option<ResolutionRow> = sqlx::query_as(
            "SELECT b.id AS block_id, v.id AS visit_id, c.id AS customer_id,
                    c.full_name AS customer_name, b.tier, b.resource_kind,
                    b.resource_id, b.ends_at AS checkout_at
             FROM resources r
             JOIN checkin_blocks b ON b.resource_id = r.id
             JOIN visits v ON v.id = b.visit_id AND v.ended_at IS NULL
             JOIN customers c ON c.id = v.customer_id
             WHERE r.key_token = $1
             ORDER BY b.ends_at DESC
             LIMIT 1",
        )
        .bind(key_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| CoreError::NotFound("Key does not match an active stay".to_string()))?
            .into_resolution(Utc::now())
    }

    async fn create_request(
        &self,
        block_id: Uuid,
        checklist: serde_json::Value,
    ) -> CoreResult<CheckoutRequest> {
        // Guard: the block must belong to an open visit.
        let open: Option<(Uuid,)> = sqlx::query_as(
            "SELECT v.id FROM checkin_blocks b
             JOIN visits v ON v.id = b.visit_id
             WHERE b.id = $1 AND v.ended_at IS NULL",
        )
        .bind(block_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        let (visit_id,) = open.ok_or_else(|| {
            CoreError::Conflict(format!("Block {} has no open visit", block_id))
        })?;

        let request = CheckoutRequest::new(block_id, visit_id, checklist);
        let result = sqlx::query(
            "INSERT INTO checkout_requests (id, block_id, visit_id, status, checklist, created_at)
             VALUES ($1, $2, $3, 'OPEN', $4, $5)",
        )
        .bind(request.id)
        .bind(request.block_id)
        .bind(request.visit_id)
        .bind(&request.checklist)
        .bind(request.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(request),
            // One open request per block; a duplicate scan gets the
            // existing one back.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let row: RequestRow = sqlx::query_as(&format!(
                    "SELECT {} FROM checkout_requests WHERE block_id = $1 AND status = 'OPEN'",
                    REQUEST_COLS
                ))
                .bind(block_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
                row.into_request()
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_request(&self, request_id: Uuid) -> CoreResult<CheckoutRequest> {
        self.fetch_request(request_id).await
    }

    async fn claim(&self, request_id: Uuid, staff: &str) -> CoreResult<CheckoutRequest> {
        // Exclusive while live, stealable once expired, refreshable by the
        // current holder.
        let result = sqlx::query(
            "UPDATE checkout_requests
             SET claimed_by = $2,
                 claim_expires_at = NOW() + ($3 * INTERVAL '1 minute')
             WHERE id = $1 AND status = 'OPEN'
               AND (claimed_by IS NULL OR claimed_by = $2 OR claim_expires_at <= NOW())",
        )
        .bind(request_id)
        .bind(staff)
        .bind(self.rules.claim_expiry_minutes as i32)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(self.explain_claim_miss(request_id, staff).await);
        }
        self.fetch_request(request_id).await
    }

    async fn confirm_items(&self, request_id: Uuid, staff: &str) -> CoreResult<CheckoutRequest> {
        let result = sqlx::query(
            "UPDATE checkout_requests
             SET items_confirmed = TRUE
             WHERE id = $1 AND status = 'OPEN'
               AND claimed_by = $2 AND claim_expires_at > NOW()",
        )
        .bind(request_id)
        .bind(staff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(self.explain_claim_miss(request_id, staff).await);
        }
        self.fetch_request(request_id).await
    }

    async fn mark_fee_paid(&self, request_id: Uuid, staff: &str) -> CoreResult<CheckoutRequest> {
        let result = sqlx::query(
            "UPDATE checkout_requests
             SET fee_paid = TRUE
             WHERE id = $1 AND status = 'OPEN'
               AND claimed_by = $2 AND claim_expires_at > NOW()",
        )
        .bind(request_id)
        .bind(staff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(self.explain_claim_miss(request_id, staff).await);
        }
        self.fetch_request(request_id).await
    }

    async fn complete(&self, request_id: Uuid, staff: &str) -> CoreResult<CheckoutOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // 1. Lock the request row; concurrent completions serialize here.
        let request: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {} FROM checkout_requests WHERE id = $1 FOR UPDATE",
            REQUEST_COLS
        ))
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let request = request
            .ok_or_else(|| {
                CoreError::NotFound(format!("Checkout request {} not found", request_id))
            })?
            .into_request()?;

        // 2. Replay path: already completed, report and write nothing.
        if request.status == RequestStatus::Completed {
            return Ok(CheckoutOutcome {
                visit_id: request.visit_id,
                block_id: request.block_id,
                settlement: Settlement {
                    late_minutes: request.late_minutes,
                    fee_cents: request.fee_cents,
                    ban_applied: request.ban_applied,
                },
                completed_at: request.completed_at.unwrap_or(now),
                already_checked_out: true,
                cancelled_waitlist_entries: Vec::new(),
            });
        }
        if request.status != RequestStatus::Open {
            return Err(CoreError::Conflict(format!(
                "Checkout request {} is cancelled",
                request_id
            )));
        }

        // 3. Lock visit and block.
        let visit: Option<(Uuid, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT customer_id, ended_at FROM visits WHERE id = $1 FOR UPDATE",
        )
        .bind(request.visit_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let (customer_id, ended_at) = visit.ok_or_else(|| {
            CoreError::NotFound(format!("Visit {} not found", request.visit_id))
        })?;

        if let Some(ended) = ended_at {
            // The visit was closed through another path; nothing to settle.
            return Ok(CheckoutOutcome {
                visit_id: request.visit_id,
                block_id: request.block_id,
                settlement: Settlement {
                    late_minutes: 0,
                    fee_cents: 0,
                    ban_applied: false,
                },
                completed_at: ended,
                already_checked_out: true,
                cancelled_waitlist_entries: Vec::new(),
            });
        }

        let block: BlockRow = sqlx::query_as(&format!(
            "SELECT {} FROM checkin_blocks WHERE id = $1",
            BLOCK_COLS
        ))
        .bind(request.block_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let block = block.into_block()?;

        // 4. Gates: live claim by this staff member, checklist confirmed.
        // The fee is recomputed against the wall clock here; the
        // resolution-time preview is advisory only.
        match (&request.claimed_by, request.claim_expires_at) {
            (Some(holder), Some(expires)) if holder == staff && expires > now => {}
            (Some(holder), Some(expires)) if holder != staff && expires > now => {
                return Err(CoreError::Conflict(format!(
                    "Checkout request {} is already claimed by {}",
                    request_id, holder
                )));
            }
            _ => {
                return Err(CoreError::Validation(format!(
                    "Checkout request {} has not been claimed",
                    request_id
                )));
            }
        }
        if !request.items_confirmed {
            return Err(CoreError::Validation(format!(
                "Item checklist not confirmed for request {}",
                request_id
            )));
        }
        let settlement = Settlement::settle(block.ends_at, now);
        // Payment never blocks completion; an uncollected fee follows the
        // customer as past-due balance.
        let past_due = request.past_due_posting(&settlement);

        // 5. End the visit.
        sqlx::query("UPDATE visits SET ended_at = $2 WHERE id = $1")
            .bind(request.visit_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        // 6. Release the resource into the cleaning cycle.
        let resource_id = match block.resource {
            ResourceRef::Room(id) | ResourceRef::Locker(id) => id,
        };
        sqlx::query(
            "UPDATE resources
             SET status = 'DIRTY', assigned_customer_id = NULL, key_token = NULL,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(resource_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // 7. Post the fee and, at the top tier, the ban. An uncollected fee
        // goes onto the customer's balance. Bans never stack: an existing
        // longer ban stands.
        if settlement.fee_cents > 0 {
            sqlx::query(
                "INSERT INTO charges (customer_id, visit_id, description, amount_cents)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(customer_id)
            .bind(request.visit_id)
            .bind(format!("Late checkout ({}m)", settlement.late_minutes))
            .bind(settlement.fee_cents)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        if past_due > 0 {
            sqlx::query(
                "UPDATE customers
                 SET past_due_cents = past_due_cents + $2, updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(customer_id)
            .bind(past_due)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        if settlement.ban_applied {
            let ban_until = now + Duration::days(LATE_BAN_DAYS);
            let note = format!(
                "{}: banned {} days for {}m late checkout",
                now.format("%Y-%m-%d"),
                LATE_BAN_DAYS,
                settlement.late_minutes
            );
            sqlx::query(
                "UPDATE customers
                 SET banned_until = GREATEST(COALESCE(banned_until, $2), $2),
                     notes = CASE WHEN notes = '' THEN $3 ELSE notes || E'\n' || $3 END,
                     updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(customer_id)
            .bind(ban_until)
            .bind(note)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        // 8. Retire any live waitlist entries for the ending visit.
        let cancelled: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE waitlist
             SET status = 'CANCELLED', cancel_reason = 'CHECKED_OUT',
                 offered_room_id = NULL, updated_at = NOW()
             WHERE visit_id = $1 AND status IN ('ACTIVE', 'OFFERED')
             RETURNING id",
        )
        .bind(request.visit_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        // 9. Close the request with the final numbers.
        sqlx::query(
            "UPDATE checkout_requests
             SET status = 'COMPLETED', completed_at = $2,
                 late_minutes = $3, fee_cents = $4, ban_applied = $5
             WHERE id = $1",
        )
        .bind(request_id)
        .bind(now)
        .bind(settlement.late_minutes)
        .bind(settlement.fee_cents)
        .bind(settlement.ban_applied)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        add_audit_change(
            &mut *tx,
            staff,
            "checkout.complete",
            "visit",
            Some(request.visit_id),
            Some(json!({"ended_at": Option::<DateTime<Utc>>::None})),
            Some(json!({
                "ended_at": now,
                "late_minutes": settlement.late_minutes,
                "fee_cents": settlement.fee_cents,
                "past_due_posted_cents": past_due,
                "ban_applied": settlement.ban_applied,
            })),
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(CheckoutOutcome {
            visit_id: request.visit_id,
            block_id: request.block_id,
            settlement,
            completed_at: now,
            already_checked_out: false,
            cancelled_waitlist_entries: cancelled.into_iter().map(|(id,)| id).collect(),
        })
    }

    async fn open_requests(&self) -> CoreResult<Vec<CheckoutRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "SELECT {} FROM checkout_requests WHERE status = 'OPEN' ORDER BY created_at",
            REQUEST_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(RequestRow::into_request).collect()
    }

    async fn overdue_blocks(&self) -> CoreResult<Vec<KeyResolution>> {
        let now = Utc::now();
        let rows: Vec<ResolutionRow> = sqlx::query_as(
            "SELECT b.id AS block_id, v.id AS visit_id, c.id AS customer_id,
                    c.full_name AS customer_name, b.tier, b.resource_kind,
                    b.resource_id, b.ends_at AS checkout_at
             FROM checkin_blocks b
             JOIN visits v ON v.id = b.visit_id AND v.ended_at IS NULL
             JOIN customers c ON c.id = v.customer_id
             WHERE b.ends_at < NOW()
               AND b.ends_at = (SELECT MAX(b2.ends_at) FROM checkin_blocks b2
                                WHERE b2.visit_id = v.id)
             ORDER BY b.ends_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(|r| r.into_resolution(now)).collect()
    }
}
