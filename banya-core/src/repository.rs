use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreResult;
use banya_catalog::{RentalTier, Resource, ResourceKind, ResourceStatus};
use banya_lane::session::{LaneSession, MembershipIntent, PaymentState, Role};
use banya_visit::{
    ActiveVisitSummary, CheckoutOutcome, CheckoutRequest, Customer, KeyResolution, OccupancyBlock,
    RenewalKind, VisitAggregate,
};
use banya_waitlist::{CancelReason, WaitlistEntry};

/// An entry plus what the kiosk shows next to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistStanding {
    pub entry: WaitlistEntry,
    pub position: Option<usize>,
    pub eta: Option<DateTime<Utc>>,
}

/// Repository trait for lane session state. Mutations are conditional
/// updates; the confirm step is the compare-and-set that decides first-wins.
#[async_trait]
pub trait LaneSessionRepository: Send + Sync {
    async fn start(&self, lane: &str) -> CoreResult<LaneSession>;

    async fn get_active(&self, lane: &str) -> CoreResult<Option<LaneSession>>;

    async fn get(&self, id: Uuid) -> CoreResult<LaneSession>;

    async fn bind_customer(
        &self,
        id: Uuid,
        customer_id: Uuid,
        membership_scanned: bool,
    ) -> CoreResult<LaneSession>;

    async fn propose(&self, id: Uuid, tier: RentalTier, by: Role) -> CoreResult<LaneSession>;

    async fn confirm(&self, id: Uuid, by: Role) -> CoreResult<LaneSession>;

    async fn acknowledge(&self, id: Uuid, by: Role) -> CoreResult<LaneSession>;

    async fn set_membership_intent(
        &self,
        id: Uuid,
        intent: MembershipIntent,
    ) -> CoreResult<LaneSession>;

    async fn mark_id_scanned(&self, id: Uuid) -> CoreResult<LaneSession>;

    async fn set_payment(
        &self,
        id: Uuid,
        reference: Option<String>,
        state: PaymentState,
    ) -> CoreResult<LaneSession>;

    async fn kiosk_ack(&self, id: Uuid) -> CoreResult<LaneSession>;

    async fn reset(&self, id: Uuid) -> CoreResult<LaneSession>;
}

/// Repository trait for visits and their occupancy block chains.
#[async_trait]
pub trait VisitRepository: Send + Sync {
    /// Check a customer in: assigns a clean resource of the tier, opens the
    /// visit and its initial block, and marks the resource occupied.
    async fn open_initial(
        &self,
        customer_id: Uuid,
        tier: RentalTier,
        lane_session_id: Option<Uuid>,
    ) -> CoreResult<ActiveVisitSummary>;

    async fn renew(&self, visit_id: Uuid, kind: RenewalKind) -> CoreResult<ActiveVisitSummary>;

    async fn get_aggregate(&self, visit_id: Uuid) -> CoreResult<VisitAggregate>;

    async fn get_block(&self, block_id: Uuid) -> CoreResult<OccupancyBlock>;

    async fn sign_agreement(&self, block_id: Uuid) -> CoreResult<()>;

    async fn active_by_membership(
        &self,
        membership_number: &str,
    ) -> CoreResult<Vec<ActiveVisitSummary>>;
}

/// Repository trait for the checkout completion flow.
#[async_trait]
pub trait CheckoutRepository: Send + Sync {
    async fn resolve_key(&self, key_token: &str) -> CoreResult<KeyResolution>;

    async fn create_request(
        &self,
        block_id: Uuid,
        checklist: serde_json::Value,
    ) -> CoreResult<CheckoutRequest>;

    async fn get_request(&self, request_id: Uuid) -> CoreResult<CheckoutRequest>;

    async fn claim(&self, request_id: Uuid, staff: &str) -> CoreResult<CheckoutRequest>;

    async fn confirm_items(&self, request_id: Uuid, staff: &str) -> CoreResult<CheckoutRequest>;

    async fn mark_fee_paid(&self, request_id: Uuid, staff: &str) -> CoreResult<CheckoutRequest>;

    /// The single-transaction completion. Replays against an already-ended
    /// visit return `already_checked_out` and write nothing.
    async fn complete(&self, request_id: Uuid, staff: &str) -> CoreResult<CheckoutOutcome>;

    async fn open_requests(&self) -> CoreResult<Vec<CheckoutRequest>>;

    /// Blocks past their scheduled end with no open request, for the
    /// register's manual checkout list.
    async fn overdue_blocks(&self) -> CoreResult<Vec<KeyResolution>>;
}

/// Repository trait for the room-upgrade waitlist.
#[async_trait]
pub trait WaitlistRepository: Send + Sync {
    /// Lazy expiry sweep: retires entries whose backing stay has ended and
    /// offers past their hold window. Callers run it before reading the
    /// live queue and broadcast the returned ids.
    async fn expire_stale(&self) -> CoreResult<Vec<Uuid>>;

    async fn join(
        &self,
        visit_id: Uuid,
        desired_tier: RentalTier,
        backup_tier: Option<RentalTier>,
    ) -> CoreResult<WaitlistStanding>;

    async fn standing(&self, entry_id: Uuid) -> CoreResult<WaitlistStanding>;

    async fn list_active(&self) -> CoreResult<Vec<WaitlistEntry>>;

    /// Offer a specific freed room to the next entry in line for its tier.
    /// Returns None when nobody is waiting.
    async fn offer_room(&self, room_id: Uuid) -> CoreResult<Option<WaitlistEntry>>;

    /// Accept a pending offer: reassigns the visit's active block to the
    /// offered room and retires the entry.
    async fn accept_offer(&self, entry_id: Uuid) -> CoreResult<ActiveVisitSummary>;

    async fn decline_offer(&self, entry_id: Uuid) -> CoreResult<WaitlistEntry>;

    async fn cancel(&self, entry_id: Uuid, reason: CancelReason) -> CoreResult<WaitlistEntry>;
}

/// Repository trait for rooms and lockers.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn list(&self, kind: Option<ResourceKind>) -> CoreResult<Vec<Resource>>;

    async fn get(&self, id: Uuid) -> CoreResult<Resource>;

    async fn set_status(&self, id: Uuid, status: ResourceStatus) -> CoreResult<Resource>;

    async fn find_assignable(&self, tier: RentalTier) -> CoreResult<Option<Resource>>;
}

/// Repository trait for customer records.
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> CoreResult<Customer>;

    async fn find_by_membership(&self, membership_number: &str) -> CoreResult<Option<Customer>>;

    async fn create(&self, full_name: &str) -> CoreResult<Customer>;

    /// Apply a purchase or renewal decided during the lane session.
    async fn apply_membership(
        &self,
        customer_id: Uuid,
        intent: MembershipIntent,
        valid_until: DateTime<Utc>,
    ) -> CoreResult<Customer>;
}
