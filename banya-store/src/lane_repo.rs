use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use banya_catalog::RentalTier;
use banya_core::repository::LaneSessionRepository;
use banya_core::{CoreError, CoreResult};
use banya_lane::{LaneSession, MembershipIntent, PaymentState, Role, SessionStatus};

const SESSION_COLS: &str = "id, lane, status, customer_id, proposed_tier, proposed_by, \
     selection_confirmed, confirmed_tier, confirmed_by, locked_at, acknowledged_by, \
     membership_intent, payment_intent_ref, payment_state, id_scanned, membership_scanned, \
     agreement_signed, kiosk_acked_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct LaneSessionRow {
    id: Uuid,
    lane: String,
    status: String,
    customer_id: Option<Uuid>,
    proposed_tier: Option<String>,
    proposed_by: Option<String>,
    selection_confirmed: bool,
    confirmed_tier: Option<String>,
    confirmed_by: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<String>,
    membership_intent: Option<String>,
    payment_intent_ref: Option<String>,
    payment_state: String,
    id_scanned: bool,
    membership_scanned: bool,
    agreement_signed: bool,
    kiosk_acked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_col<T>(value: &str, what: &str) -> CoreResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| CoreError::Internal(format!("Bad {} column: {}", what, e)))
}

fn parse_opt<T>(value: Option<String>, what: &str) -> CoreResult<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    value.map(|v| parse_col(&v, what)).transpose()
}

impl LaneSessionRow {
    fn into_session(self) -> CoreResult<LaneSession> {
        Ok(LaneSession {
            id: self.id,
            lane: self.lane,
            status: parse_col::<SessionStatus>(&self.status, "status")?,
            customer_id: self.customer_id,
            proposed_tier: parse_opt::<RentalTier>(self.proposed_tier, "proposed_tier")?,
            proposed_by: parse_opt::<Role>(self.proposed_by, "proposed_by")?,
            selection_confirmed: self.selection_confirmed,
            confirmed_tier: parse_opt::<RentalTier>(self.confirmed_tier, "confirmed_tier")?,
            confirmed_by: parse_opt::<Role>(self.confirmed_by, "confirmed_by")?,
            locked_at: self.locked_at,
            acknowledged_by: parse_opt::<Role>(self.acknowledged_by, "acknowledged_by")?,
            membership_intent: parse_opt::<MembershipIntent>(
                self.membership_intent,
                "membership_intent",
            )?,
            payment_intent_ref: self.payment_intent_ref,
            payment_state: parse_col::<PaymentState>(&self.payment_state, "payment_state")?,
            id_scanned: self.id_scanned,
            membership_scanned: self.membership_scanned,
            agreement_signed: self.agreement_signed,
            kiosk_acked_at: self.kiosk_acked_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("Database error: {}", e))
}

pub struct PgLaneSessionRepository {
    pool: Pool<Postgres>,
}

impl PgLaneSessionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> CoreResult<LaneSession> {
        let row: Option<LaneSessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM lane_sessions WHERE id = $1",
            SESSION_COLS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| CoreError::NotFound(format!("Lane session {} not found", id)))?
            .into_session()
    }

    /// Refetch after a conditional update matched zero rows, to tell the
    /// benign no-op cases apart from a dead session.
    async fn explain_miss(&self, id: Uuid) -> CoreResult<LaneSession> {
        let session = self.fetch(id).await?;
        if session.status != SessionStatus::Active {
            return Err(CoreError::NotActive(session.lane));
        }
        Ok(session)
    }
}

#[async_trait]
impl LaneSessionRepository for PgLaneSessionRepository {
    async fn start(&self, lane: &str) -> CoreResult<LaneSession> {
        let session = LaneSession::new(lane);
        let result = sqlx::query(
            "INSERT INTO lane_sessions (id, lane, status, payment_state, created_at, updated_at)
             VALUES ($1, $2, 'ACTIVE', 'NONE', $3, $4)",
        )
        .bind(session.id)
        .bind(&session.lane)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(session),
            // The partial unique index on (lane) WHERE ACTIVE fired: a
            // transaction is already running, hand it back unchanged.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => self
                .get_active(lane)
                .await?
                .ok_or_else(|| CoreError::Conflict(format!("Lane {} is busy", lane))),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_active(&self, lane: &str) -> CoreResult<Option<LaneSession>> {
        let row: Option<LaneSessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM lane_sessions WHERE lane = $1 AND status = 'ACTIVE'",
            SESSION_COLS
        ))
        .bind(lane)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(LaneSessionRow::into_session).transpose()
    }

    async fn get(&self, id: Uuid) -> CoreResult<LaneSession> {
        self.fetch(id).await
    }

    async fn bind_customer(
        &self,
        id: Uuid,
        customer_id: Uuid,
        membership_scanned: bool,
    ) -> CoreResult<LaneSession> {
        let result = sqlx::query(
            "UPDATE lane_sessions
             SET customer_id = $2, membership_scanned = $3, updated_at = NOW()
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id)
        .bind(customer_id)
        .bind(membership_scanned)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let session = self.fetch(id).await?;
            return Err(CoreError::NotActive(session.lane));
        }
        self.fetch(id).await
    }

    async fn propose(&self, id: Uuid, tier: RentalTier, by: Role) -> CoreResult<LaneSession> {
        let result = sqlx::query(
            "UPDATE lane_sessions
             SET proposed_tier = $2, proposed_by = $3, updated_at = NOW()
             WHERE id = $1 AND status = 'ACTIVE' AND selection_confirmed = FALSE",
        )
        .bind(id)
        .bind(tier.as_str())
        .bind(by.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            // Locked selection: proposing is a silent no-op, return as-is.
            return self.explain_miss(id).await;
        }
        self.fetch(id).await
    }

    async fn confirm(&self, id: Uuid, by: Role) -> CoreResult<LaneSession> {
        // The compare-and-set that decides first-wins between the two
        // actors: only an unconfirmed session with a live proposal matches.
        let result = sqlx::query(
            "UPDATE lane_sessions
             SET selection_confirmed = TRUE,
                 confirmed_tier = proposed_tier,
                 confirmed_by = $2,
                 locked_at = NOW(),
                 updated_at = NOW()
             WHERE id = $1 AND status = 'ACTIVE'
               AND selection_confirmed = FALSE
               AND proposed_tier IS NOT NULL",
        )
        .bind(id)
        .bind(by.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let session = self.explain_miss(id).await?;
            if session.selection_confirmed {
                // Lost the race (or replayed): the existing lock stands.
                return Ok(session);
            }
            return Err(CoreError::Validation(format!(
                "No rental type proposed on lane {}",
                session.lane
            )));
        }
        self.fetch(id).await
    }

    async fn acknowledge(&self, id: Uuid, by: Role) -> CoreResult<LaneSession> {
        let result = sqlx::query(
            "UPDATE lane_sessions
             SET acknowledged_by = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'ACTIVE' AND selection_confirmed = TRUE",
        )
        .bind(id)
        .bind(by.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let session = self.explain_miss(id).await?;
            return Err(CoreError::Validation(format!(
                "No confirmed selection to acknowledge on lane {}",
                session.lane
            )));
        }
        self.fetch(id).await
    }

    async fn set_membership_intent(
        &self,
        id: Uuid,
        intent: MembershipIntent,
    ) -> CoreResult<LaneSession> {
        // NONE is stored, not nulled: "declined" and "undecided" differ.
        let result = sqlx::query(
            "UPDATE lane_sessions
             SET membership_intent = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id)
        .bind(intent.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let session = self.fetch(id).await?;
            return Err(CoreError::NotActive(session.lane));
        }
        self.fetch(id).await
    }

    async fn mark_id_scanned(&self, id: Uuid) -> CoreResult<LaneSession> {
        let result = sqlx::query(
            "UPDATE lane_sessions
             SET id_scanned = TRUE, updated_at = NOW()
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let session = self.fetch(id).await?;
            return Err(CoreError::NotActive(session.lane));
        }
        self.fetch(id).await
    }

    async fn set_payment(
        &self,
        id: Uuid,
        reference: Option<String>,
        state: PaymentState,
    ) -> CoreResult<LaneSession> {
        let result = sqlx::query(
            "UPDATE lane_sessions
             SET payment_intent_ref = $2, payment_state = $3, updated_at = NOW()
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id)
        .bind(reference)
        .bind(state.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let session = self.fetch(id).await?;
            return Err(CoreError::NotActive(session.lane));
        }
        self.fetch(id).await
    }

    async fn kiosk_ack(&self, id: Uuid) -> CoreResult<LaneSession> {
        // Timestamp only; completion is the staff reset's job.
        let result = sqlx::query(
            "UPDATE lane_sessions
             SET kiosk_acked_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let session = self.fetch(id).await?;
            return Err(CoreError::NotActive(session.lane));
        }
        self.fetch(id).await
    }

    async fn reset(&self, id: Uuid) -> CoreResult<LaneSession> {
        let result = sqlx::query(
            "UPDATE lane_sessions
             SET status = 'COMPLETED', customer_id = NULL, updated_at = NOW()
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let session = self.fetch(id).await?;
            return Err(CoreError::NotActive(session.lane));
        }
        self.fetch(id).await
    }
}
