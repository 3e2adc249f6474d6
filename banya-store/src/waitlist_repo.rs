use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use banya_catalog::{RentalTier, ResourceKind};
use banya_core::repository::{WaitlistRepository, WaitlistStanding};
use banya_core::{CoreError, CoreResult};
use banya_visit::{ActiveVisitSummary, ResourceRef};
use banya_waitlist::{
    estimate_eta, position_of, CancelReason, WaitlistEntry, WaitlistMatcher, WaitlistStatus,
};

use crate::app_config::BusinessRules;
use crate::audit::add_audit_change;
use crate::visit_repo::{db_err, new_key_token, visit_err};
use crate::PgVisitRepository;

const ENTRY_COLS: &str = "id, visit_id, customer_id, desired_tier, backup_tier, status, \
     offered_room_id, offered_at, cancel_reason, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    visit_id: Uuid,
    customer_id: Uuid,
    desired_tier: String,
    backup_tier: Option<String>,
    status: String,
    offered_room_id: Option<Uuid>,
    offered_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EntryRow {
    fn into_entry(self) -> CoreResult<WaitlistEntry> {
        Ok(WaitlistEntry {
            id: self.id,
            visit_id: self.visit_id,
            customer_id: self.customer_id,
            desired_tier: self
                .desired_tier
                .parse::<RentalTier>()
                .map_err(CoreError::Internal)?,
            backup_tier: self
                .backup_tier
                .map(|t| t.parse::<RentalTier>())
                .transpose()
                .map_err(CoreError::Internal)?,
            status: self
                .status
                .parse::<WaitlistStatus>()
                .map_err(CoreError::Internal)?,
            offered_room_id: self.offered_room_id,
            offered_at: self.offered_at,
            cancel_reason: self
                .cancel_reason
                .map(|r| r.parse::<CancelReason>())
                .transpose()
                .map_err(CoreError::Internal)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct PgWaitlistRepository {
    pool: Pool<Postgres>,
    rules: BusinessRules,
}

impl PgWaitlistRepository {
    pub fn new(pool: Pool<Postgres>, rules: BusinessRules) -> Self {
        Self { pool, rules }
    }

    fn offer_ttl(&self) -> Duration {
        Duration::minutes(self.rules.waitlist_offer_ttl_minutes)
    }

    async fn fetch_entry(&self, entry_id: Uuid) -> CoreResult<WaitlistEntry> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM waitlist WHERE id = $1",
            ENTRY_COLS
        ))
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| CoreError::NotFound(format!("Waitlist entry {} not found", entry_id)))?
            .into_entry()
    }

    async fn build_standing(&self, entry: WaitlistEntry) -> CoreResult<WaitlistStanding> {
        if !entry.is_live() {
            return Ok(WaitlistStanding {
                entry,
                position: None,
                eta: None,
            });
        }

        // The live queue is small; rank it in memory.
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM waitlist
             WHERE status IN ('ACTIVE', 'OFFERED') AND desired_tier = $1",
            ENTRY_COLS
        ))
        .bind(entry.desired_tier.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let peers = rows
            .into_iter()
            .map(EntryRow::into_entry)
            .collect::<CoreResult<Vec<_>>>()?;
        let position = position_of(&peers, entry.id);

        // Scheduled ends of currently occupied resources of the desired
        // tier; the matcher turns the earliest into an estimate.
        let ends: Vec<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT MAX(b.ends_at) FROM resources r
             JOIN checkin_blocks b ON b.resource_id = r.id
             JOIN visits v ON v.id = b.visit_id AND v.ended_at IS NULL
             WHERE r.tier = $1 AND r.status = 'OCCUPIED'
             GROUP BY r.id",
        )
        .bind(entry.desired_tier.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let ends: Vec<DateTime<Utc>> = ends.into_iter().map(|(e,)| e).collect();
        let eta = estimate_eta(&ends, Utc::now());

        Ok(WaitlistStanding {
            entry,
            position,
            eta,
        })
    }
}

#[async_trait]
impl WaitlistRepository for PgWaitlistRepository {
    /// Lazy expiry sweep, run before every read of the live queue. Retires
    /// entries whose backing stay has ended, plus offers past their hold
    /// window. There is no background job; staleness is resolved on access
    /// and the returned ids are broadcast by the caller.
    async fn expire_stale(&self) -> CoreResult<Vec<Uuid>> {
        let cutoff = Utc::now() - self.offer_ttl();
        let expired: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE waitlist
             SET status = 'EXPIRED', offered_room_id = NULL, updated_at = NOW()
             WHERE (status = 'OFFERED' AND offered_at <= $1)
                OR (status IN ('ACTIVE', 'OFFERED')
                    AND (SELECT MAX(b.ends_at) FROM checkin_blocks b
                         WHERE b.visit_id = waitlist.visit_id) < NOW())
             RETURNING id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(expired.into_iter().map(|(id,)| id).collect())
    }

    async fn join(
        &self,
        visit_id: Uuid,
        desired_tier: RentalTier,
        backup_tier: Option<RentalTier>,
    ) -> CoreResult<WaitlistStanding> {
        let visit: Option<(Uuid, Option<DateTime<Utc>>)> =
            sqlx::query_as("SELECT customer_id, ended_at FROM visits WHERE id = $1")
                .bind(visit_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let (customer_id, ended_at) = visit
            .ok_or_else(|| CoreError::NotFound(format!("Visit {} not found", visit_id)))?;
        if ended_at.is_some() {
            return Err(CoreError::Conflict(format!(
                "Visit {} has already ended",
                visit_id
            )));
        }

        let entry = WaitlistEntry::new(visit_id, customer_id, desired_tier, backup_tier);

        // The backup tier is the resource the customer keeps while waiting,
        // so it must be what their active block actually holds.
        let held: Option<(String,)> = sqlx::query_as(
            "SELECT tier FROM checkin_blocks
             WHERE visit_id = $1
             ORDER BY ends_at DESC
             LIMIT 1",
        )
        .bind(visit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        let (held_tier,) =
            held.ok_or_else(|| CoreError::Conflict(format!("Visit {} has no block", visit_id)))?;
        let held_tier = held_tier.parse::<RentalTier>().map_err(CoreError::Internal)?;
        if !entry.backup_matches(held_tier) {
            return Err(CoreError::Validation(format!(
                "Backup tier does not match the held {} resource",
                held_tier.as_str()
            )));
        }

        let result = sqlx::query(
            "INSERT INTO waitlist
             (id, visit_id, customer_id, desired_tier, backup_tier, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, 'ACTIVE', $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.visit_id)
        .bind(entry.customer_id)
        .bind(entry.desired_tier.as_str())
        .bind(entry.backup_tier.map(|t| t.as_str()))
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => self.build_standing(entry).await,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(CoreError::Conflict(
                format!("Visit {} already has a live waitlist entry", visit_id),
            )),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn standing(&self, entry_id: Uuid) -> CoreResult<WaitlistStanding> {
        let entry = self.fetch_entry(entry_id).await?;
        self.build_standing(entry).await
    }

    async fn list_active(&self) -> CoreResult<Vec<WaitlistEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM waitlist
             WHERE status IN ('ACTIVE', 'OFFERED')
             ORDER BY created_at, id",
            ENTRY_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    async fn offer_room(&self, room_id: Uuid) -> CoreResult<Option<WaitlistEntry>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let room: Option<(String, String, Option<Uuid>)> = sqlx::query_as(
            "SELECT tier, status, assigned_customer_id FROM resources
             WHERE id = $1 AND kind = 'ROOM' FOR UPDATE",
        )
        .bind(room_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let (tier, status, assigned) = room
            .ok_or_else(|| CoreError::NotFound(format!("Room {} not found", room_id)))?;
        if status != "CLEAN" || assigned.is_some() {
            return Err(CoreError::Conflict(format!(
                "Room {} is not ready to offer",
                room_id
            )));
        }

        // Lock the candidate pool, then let the matching policy pick.
        // Desired-tier entries outrank backup-tier interest regardless of age.
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM waitlist
             WHERE status = 'ACTIVE' AND (desired_tier = $1 OR backup_tier = $1)
             ORDER BY created_at, id
             FOR UPDATE SKIP LOCKED",
            ENTRY_COLS
        ))
        .bind(&tier)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut candidates = rows
            .into_iter()
            .map(EntryRow::into_entry)
            .collect::<CoreResult<Vec<_>>>()?;
        let room_tier = tier.parse::<RentalTier>().map_err(CoreError::Internal)?;

        // Scheduled stay ends for the candidates; a lapsed stay is never
        // offered a room, even if the sweep has not caught it yet.
        let visit_ids: Vec<Uuid> = candidates.iter().map(|e| e.visit_id).collect();
        let ends: Vec<(Uuid, DateTime<Utc>)> = sqlx::query_as(
            "SELECT visit_id, MAX(ends_at) FROM checkin_blocks
             WHERE visit_id = ANY($1)
             GROUP BY visit_id",
        )
        .bind(&visit_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;
        let stay_ends: HashMap<Uuid, DateTime<Utc>> = ends.into_iter().collect();

        let matcher = WaitlistMatcher {
            offer_ttl: self.offer_ttl(),
        };
        let Some(picked) =
            matcher.next_for_tier(&mut candidates, &stay_ends, room_tier, Utc::now())
        else {
            return Ok(None);
        };
        let entry_id = picked.id;

        sqlx::query(
            "UPDATE waitlist
             SET status = 'OFFERED', offered_room_id = $2, offered_at = NOW(), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(entry_id)
        .bind(room_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        add_audit_change(
            &mut *tx,
            "system",
            "waitlist.offer",
            "waitlist",
            Some(entry_id),
            None,
            Some(json!({"room_id": room_id})),
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        self.fetch_entry(entry_id).await.map(Some)
    }

    async fn accept_offer(&self, entry_id: Uuid) -> CoreResult<ActiveVisitSummary> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let entry: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM waitlist WHERE id = $1 FOR UPDATE",
            ENTRY_COLS
        ))
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let entry = entry
            .ok_or_else(|| {
                CoreError::NotFound(format!("Waitlist entry {} not found", entry_id))
            })?
            .into_entry()?;

        if entry.status != WaitlistStatus::Offered {
            return Err(CoreError::Conflict(format!(
                "Waitlist entry {} has no pending offer",
                entry_id
            )));
        }
        let room_id = entry.offered_room_id.ok_or_else(|| {
            CoreError::Internal(format!("Offered entry {} has no room", entry_id))
        })?;
        if entry.offer_stale(self.offer_ttl(), now) {
            sqlx::query(
                "UPDATE waitlist
                 SET status = 'EXPIRED', offered_room_id = NULL, updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(entry_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            return Err(CoreError::Conflict(format!(
                "Offer on waitlist entry {} has expired",
                entry_id
            )));
        }

        let room: Option<(String, String, Option<Uuid>)> = sqlx::query_as(
            "SELECT tier, status, assigned_customer_id FROM resources WHERE id = $1 FOR UPDATE",
        )
        .bind(room_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let (tier, status, assigned) =
            room.ok_or_else(|| CoreError::NotFound(format!("Room {} not found", room_id)))?;
        if status != "CLEAN" || assigned.is_some() {
            return Err(CoreError::Conflict(format!(
                "Room {} is no longer available",
                room_id
            )));
        }
        let new_tier = tier.parse::<RentalTier>().map_err(CoreError::Internal)?;

        sqlx::query("SELECT id FROM visits WHERE id = $1 FOR UPDATE")
            .bind(entry.visit_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut agg = PgVisitRepository::load_aggregate(&mut tx, entry.visit_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("Visit {} not found", entry.visit_id))
            })?;

        let old_resource = agg.active_block().map_err(visit_err)?.resource;
        // The end time must not move; an upgrade is a move, not an extension.
        let block = agg
            .upgrade(ResourceRef::Room(room_id), new_tier)
            .map_err(visit_err)?
            .clone();

        sqlx::query(
            "UPDATE checkin_blocks
             SET resource_id = $2, resource_kind = $3, tier = $4
             WHERE id = $1",
        )
        .bind(block.id)
        .bind(room_id)
        .bind(ResourceKind::Room.as_str())
        .bind(new_tier.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let old_id = match old_resource {
            ResourceRef::Room(id) | ResourceRef::Locker(id) => id,
        };
        sqlx::query(
            "UPDATE resources
             SET status = 'DIRTY', assigned_customer_id = NULL, key_token = NULL,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(old_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "UPDATE resources
             SET status = 'OCCUPIED', assigned_customer_id = $2, key_token = $3,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(room_id)
        .bind(entry.customer_id)
        .bind(new_key_token())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "UPDATE waitlist
             SET status = 'CANCELLED', cancel_reason = 'FULFILLED', updated_at = NOW()
             WHERE id = $1",
        )
        .bind(entry_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        add_audit_change(
            &mut *tx,
            "register",
            "waitlist.accept",
            "waitlist",
            Some(entry_id),
            Some(json!({"resource_id": old_id})),
            Some(json!({"resource_id": room_id, "tier": new_tier.as_str()})),
        )
        .await
        .map_err(db_err)?;

        let summary = agg.summary().map_err(visit_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(summary)
    }

    async fn decline_offer(&self, entry_id: Uuid) -> CoreResult<WaitlistEntry> {
        // Back to the queue with the original created_at, so no position
        // is lost.
        let result = sqlx::query(
            "UPDATE waitlist
             SET status = 'ACTIVE', offered_room_id = NULL, offered_at = NULL,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'OFFERED'",
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict(format!(
                "Waitlist entry {} has no pending offer",
                entry_id
            )));
        }
        self.fetch_entry(entry_id).await
    }

    async fn cancel(&self, entry_id: Uuid, reason: CancelReason) -> CoreResult<WaitlistEntry> {
        let result = sqlx::query(
            "UPDATE waitlist
             SET status = 'CANCELLED', cancel_reason = $2, offered_room_id = NULL,
                 updated_at = NOW()
             WHERE id = $1 AND status IN ('ACTIVE', 'OFFERED')",
        )
        .bind(entry_id)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict(format!(
                "Waitlist entry {} is not active",
                entry_id
            )));
        }
        self.fetch_entry(entry_id).await
    }
}
