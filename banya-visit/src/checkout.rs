use banya_catalog::{late_fee, LateFee, RentalTier};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ResourceRef;

/// Late settlement for one block, computed once against the scheduled
/// checkout time when the register completes the transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub late_minutes: i64,
    pub fee_cents: i32,
    pub ban_applied: bool,
}

impl Settlement {
    pub fn settle(scheduled_end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let late_minutes = ((now - scheduled_end).num_minutes()).max(0);
        let LateFee {
            fee_cents, ban_days, ..
        } = late_fee(late_minutes);
        Self {
            late_minutes,
            fee_cents,
            ban_applied: ban_days.is_some(),
        }
    }

    pub fn is_late(&self) -> bool {
        self.fee_cents > 0
    }
}

/// What a key scan resolves to at the register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyResolution {
    pub block_id: Uuid,
    pub visit_id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub tier: RentalTier,
    pub resource: ResourceRef,
    pub checkout_at: DateTime<Utc>,
    /// Settlement preview as of resolution time; recomputed at completion.
    pub settlement: Settlement,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Open,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "OPEN",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(RequestStatus::Open),
            "COMPLETED" => Ok(RequestStatus::Completed),
            "CANCELLED" => Ok(RequestStatus::Cancelled),
            other => Err(format!("Unknown checkout request status: {}", other)),
        }
    }
}

/// A pending checkout surfaced to register staff. Claims are exclusive but
/// expire, so an abandoned claim never wedges the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub id: Uuid,
    pub block_id: Uuid,
    pub visit_id: Uuid,
    pub status: RequestStatus,
    pub checklist: serde_json::Value,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub items_confirmed: bool,
    pub fee_paid: bool,
    pub late_minutes: i64,
    pub fee_cents: i32,
    pub ban_applied: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CheckoutRequest {
    pub fn new(block_id: Uuid, visit_id: Uuid, checklist: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            block_id,
            visit_id,
            status: RequestStatus::Open,
            checklist,
            claimed_by: None,
            claim_expires_at: None,
            items_confirmed: false,
            fee_paid: false,
            late_minutes: 0,
            fee_cents: 0,
            ban_applied: false,
            created_at: now,
            completed_at: None,
        }
    }

    fn claim_live(&self, now: DateTime<Utc>) -> bool {
        match (&self.claimed_by, self.claim_expires_at) {
            (Some(_), Some(expires)) => expires > now,
            _ => false,
        }
    }

    /// Take the exclusive claim on this request. Re-claiming by the same
    /// staff member refreshes the expiry; a live claim by someone else is
    /// a conflict. Expired claims are silently taken over.
    pub fn claim(
        &mut self,
        staff: &str,
        claim_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutError> {
        if self.status != RequestStatus::Open {
            return Err(CheckoutError::NotOpen(self.id));
        }
        if self.claim_live(now) {
            match &self.claimed_by {
                Some(holder) if holder != staff => {
                    return Err(CheckoutError::AlreadyClaimed {
                        request_id: self.id,
                        by: holder.clone(),
                    });
                }
                _ => {}
            }
        }
        self.claimed_by = Some(staff.to_string());
        self.claim_expires_at = Some(now + Duration::minutes(claim_minutes));
        Ok(())
    }

    pub fn confirm_items(&mut self, staff: &str, now: DateTime<Utc>) -> Result<(), CheckoutError> {
        self.require_claim_holder(staff, now)?;
        self.items_confirmed = true;
        Ok(())
    }

    pub fn mark_fee_paid(&mut self, staff: &str, now: DateTime<Utc>) -> Result<(), CheckoutError> {
        self.require_claim_holder(staff, now)?;
        self.fee_paid = true;
        Ok(())
    }

    /// Completion gate. Payment is not part of it: an uncollected fee
    /// follows the customer as past-due balance instead of blocking the
    /// register, so an absent customer can still be checked out.
    pub fn ready_to_complete(&self) -> Result<(), CheckoutError> {
        if self.status != RequestStatus::Open {
            return Err(CheckoutError::NotOpen(self.id));
        }
        if !self.items_confirmed {
            return Err(CheckoutError::ItemsNotConfirmed(self.id));
        }
        Ok(())
    }

    /// The portion of the late fee posted to the customer's past-due
    /// balance at completion. Zero when the fee was collected at the
    /// counter or there is nothing to charge.
    pub fn past_due_posting(&self, settlement: &Settlement) -> i32 {
        if self.fee_paid {
            0
        } else {
            settlement.fee_cents
        }
    }

    fn require_claim_holder(
        &self,
        staff: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutError> {
        if self.status != RequestStatus::Open {
            return Err(CheckoutError::NotOpen(self.id));
        }
        match &self.claimed_by {
            Some(holder) if holder == staff && self.claim_live(now) => Ok(()),
            Some(holder) if holder != staff && self.claim_live(now) => {
                Err(CheckoutError::AlreadyClaimed {
                    request_id: self.id,
                    by: holder.clone(),
                })
            }
            _ => Err(CheckoutError::NotClaimed(self.id)),
        }
    }
}

/// Result of the checkout completion transaction. `already_checked_out`
/// marks the idempotent replay path, which performs zero writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutOutcome {
    pub visit_id: Uuid,
    pub block_id: Uuid,
    pub settlement: Settlement,
    pub completed_at: DateTime<Utc>,
    pub already_checked_out: bool,
    /// Live waitlist entries retired because the visit ended.
    pub cancelled_waitlist_entries: Vec<Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Checkout request {request_id} is already claimed by {by}")]
    AlreadyClaimed { request_id: Uuid, by: String },

    #[error("Checkout request {0} has not been claimed")]
    NotClaimed(Uuid),

    #[error("Checkout request {0} is not open")]
    NotOpen(Uuid),

    #[error("Item checklist not confirmed for request {0}")]
    ItemsNotConfirmed(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scheduled_end() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 16, 0, 0).unwrap()
    }

    #[test]
    fn test_settlement_within_grace_is_free() {
        let end = scheduled_end();
        let s = Settlement::settle(end, end + Duration::minutes(29));
        assert_eq!(s.fee_cents, 0);
        assert!(!s.ban_applied);
        assert!(!s.is_late());
    }

    #[test]
    fn test_settlement_tiers_and_ban() {
        let end = scheduled_end();

        let s = Settlement::settle(end, end + Duration::minutes(45));
        assert_eq!(s.fee_cents, 1_500);
        assert!(!s.ban_applied);

        let s = Settlement::settle(end, end + Duration::minutes(75));
        assert_eq!(s.fee_cents, 3_500);
        assert!(!s.ban_applied);

        let s = Settlement::settle(end, end + Duration::minutes(95));
        assert_eq!(s.fee_cents, 3_500);
        assert!(s.ban_applied);
    }

    #[test]
    fn test_settlement_early_checkout_clamps_to_zero() {
        let end = scheduled_end();
        let s = Settlement::settle(end, end - Duration::hours(2));
        assert_eq!(s.late_minutes, 0);
        assert_eq!(s.fee_cents, 0);
    }

    fn request() -> CheckoutRequest {
        CheckoutRequest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            serde_json::json!({"towel": false, "robe": false}),
        )
    }

    #[test]
    fn test_claim_is_exclusive_while_live() {
        let now = Utc::now();
        let mut req = request();

        req.claim("alice", 10, now).unwrap();
        let result = req.claim("bob", 10, now + Duration::minutes(5));
        assert!(matches!(
            result,
            Err(CheckoutError::AlreadyClaimed { ref by, .. }) if by == "alice"
        ));
    }

    #[test]
    fn test_expired_claim_can_be_taken_over() {
        let now = Utc::now();
        let mut req = request();

        req.claim("alice", 10, now).unwrap();
        req.claim("bob", 10, now + Duration::minutes(11)).unwrap();
        assert_eq!(req.claimed_by.as_deref(), Some("bob"));
    }

    #[test]
    fn test_reclaim_refreshes_expiry() {
        let now = Utc::now();
        let mut req = request();

        req.claim("alice", 10, now).unwrap();
        req.claim("alice", 10, now + Duration::minutes(8)).unwrap();
        assert_eq!(
            req.claim_expires_at,
            Some(now + Duration::minutes(18))
        );
    }

    #[test]
    fn test_confirm_items_requires_live_claim() {
        let now = Utc::now();
        let mut req = request();

        assert!(matches!(
            req.confirm_items("alice", now),
            Err(CheckoutError::NotClaimed(_))
        ));

        req.claim("alice", 10, now).unwrap();
        assert!(matches!(
            req.confirm_items("bob", now),
            Err(CheckoutError::AlreadyClaimed { .. })
        ));
        req.confirm_items("alice", now).unwrap();
        assert!(req.items_confirmed);
    }

    #[test]
    fn test_completion_gate() {
        let now = Utc::now();
        let mut req = request();
        req.claim("alice", 10, now).unwrap();

        assert!(matches!(
            req.ready_to_complete(),
            Err(CheckoutError::ItemsNotConfirmed(_))
        ));

        req.confirm_items("alice", now).unwrap();
        assert!(req.ready_to_complete().is_ok());
    }

    #[test]
    fn test_unpaid_fee_posts_to_past_due() {
        let now = Utc::now();
        let mut req = request();
        req.claim("alice", 10, now).unwrap();
        req.confirm_items("alice", now).unwrap();

        let late = Settlement {
            late_minutes: 45,
            fee_cents: 1_500,
            ban_applied: false,
        };

        // The customer is gone; completion still goes through and the fee
        // lands on their balance.
        assert!(req.ready_to_complete().is_ok());
        assert_eq!(req.past_due_posting(&late), 1_500);

        // Collected at the counter: nothing left to post.
        req.mark_fee_paid("alice", now).unwrap();
        assert_eq!(req.past_due_posting(&late), 0);

        let on_time = Settlement {
            late_minutes: 0,
            fee_cents: 0,
            ban_applied: false,
        };
        let req2 = request();
        assert_eq!(req2.past_due_posting(&on_time), 0);
    }
}
