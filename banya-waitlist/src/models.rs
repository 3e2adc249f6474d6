use banya_catalog::RentalTier;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitlistStatus {
    Active,
    Offered,
    Cancelled,
    Expired,
}

impl WaitlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitlistStatus::Active => "ACTIVE",
            WaitlistStatus::Offered => "OFFERED",
            WaitlistStatus::Cancelled => "CANCELLED",
            WaitlistStatus::Expired => "EXPIRED",
        }
    }
}

impl std::str::FromStr for WaitlistStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(WaitlistStatus::Active),
            "OFFERED" => Ok(WaitlistStatus::Offered),
            "CANCELLED" => Ok(WaitlistStatus::Cancelled),
            "EXPIRED" => Ok(WaitlistStatus::Expired),
            other => Err(format!("Unknown waitlist status: {}", other)),
        }
    }
}

/// Why a cancelled entry was cancelled; surfaced on the customer display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    CheckedOut,
    Staff,
    Fulfilled,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::CheckedOut => "CHECKED_OUT",
            CancelReason::Staff => "STAFF",
            CancelReason::Fulfilled => "FULFILLED",
        }
    }
}

impl std::str::FromStr for CancelReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECKED_OUT" => Ok(CancelReason::CheckedOut),
            "STAFF" => Ok(CancelReason::Staff),
            "FULFILLED" => Ok(CancelReason::Fulfilled),
            other => Err(format!("Unknown cancel reason: {}", other)),
        }
    }
}

/// One customer's place in line for a room upgrade. Position is implicit:
/// `created_at` order among live entries of the same desired tier. Declining
/// an offer keeps the original `created_at`, so no position is lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub customer_id: Uuid,
    pub desired_tier: RentalTier,
    pub backup_tier: Option<RentalTier>,
    pub status: WaitlistStatus,
    pub offered_room_id: Option<Uuid>,
    pub offered_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<CancelReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaitlistEntry {
    pub fn new(
        visit_id: Uuid,
        customer_id: Uuid,
        desired_tier: RentalTier,
        backup_tier: Option<RentalTier>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            visit_id,
            customer_id,
            desired_tier,
            backup_tier,
            status: WaitlistStatus::Active,
            offered_room_id: None,
            offered_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, WaitlistStatus::Active | WaitlistStatus::Offered)
    }

    /// Whether the tier covers this entry's interest, as desired or backup.
    pub fn wants_tier(&self, tier: RentalTier) -> bool {
        self.desired_tier == tier || self.backup_tier == Some(tier)
    }

    /// The backup tier records what the customer already holds while
    /// waiting, so it must agree with the resource on their active block.
    pub fn backup_matches(&self, held_tier: RentalTier) -> bool {
        self.backup_tier.map(|t| t == held_tier).unwrap_or(true)
    }

    pub fn offer(&mut self, room_id: Uuid, now: DateTime<Utc>) -> Result<(), WaitlistError> {
        if self.status != WaitlistStatus::Active {
            return Err(WaitlistError::NotActive(self.id));
        }
        self.status = WaitlistStatus::Offered;
        self.offered_room_id = Some(room_id);
        self.offered_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<Uuid, WaitlistError> {
        if self.status != WaitlistStatus::Offered {
            return Err(WaitlistError::NoOffer(self.id));
        }
        let room_id = self.offered_room_id.ok_or(WaitlistError::NoOffer(self.id))?;
        self.status = WaitlistStatus::Cancelled;
        self.cancel_reason = Some(CancelReason::Fulfilled);
        self.updated_at = now;
        Ok(room_id)
    }

    /// Return to the queue. The original `created_at` stands, so the entry
    /// keeps its place in line.
    pub fn decline(&mut self, now: DateTime<Utc>) -> Result<(), WaitlistError> {
        if self.status != WaitlistStatus::Offered {
            return Err(WaitlistError::NoOffer(self.id));
        }
        self.status = WaitlistStatus::Active;
        self.offered_room_id = None;
        self.offered_at = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, reason: CancelReason, now: DateTime<Utc>) -> Result<(), WaitlistError> {
        if !self.is_live() {
            return Err(WaitlistError::NotActive(self.id));
        }
        self.status = WaitlistStatus::Cancelled;
        self.cancel_reason = Some(reason);
        self.offered_room_id = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn offer_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.status == WaitlistStatus::Offered
            && self
                .offered_at
                .map(|at| now - at > ttl)
                .unwrap_or(false)
    }

    /// Whether the backing stay is over, given its scheduled end. A lapsed
    /// stay retires the entry no matter what state the offer is in.
    pub fn stay_lapsed(&self, stay_end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        self.is_live() && stay_end.map(|end| end < now).unwrap_or(false)
    }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = WaitlistStatus::Expired;
        self.offered_room_id = None;
        self.updated_at = now;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WaitlistError {
    #[error("Waitlist entry {0} is not active")]
    NotActive(Uuid),

    #[error("Waitlist entry {0} has no pending offer")]
    NoOffer(Uuid),

    #[error("Visit {0} already has a live waitlist entry")]
    DuplicateEntry(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_must_match_held_tier() {
        let entry = WaitlistEntry::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            RentalTier::Double,
            Some(RentalTier::Standard),
        );
        assert!(entry.backup_matches(RentalTier::Standard));
        assert!(!entry.backup_matches(RentalTier::Double));

        let no_backup =
            WaitlistEntry::new(Uuid::new_v4(), Uuid::new_v4(), RentalTier::Double, None);
        assert!(no_backup.backup_matches(RentalTier::Standard));
    }

    #[test]
    fn test_stay_lapsed_only_after_scheduled_end() {
        let now = Utc::now();
        let entry =
            WaitlistEntry::new(Uuid::new_v4(), Uuid::new_v4(), RentalTier::Double, None);

        assert!(!entry.stay_lapsed(None, now));
        assert!(!entry.stay_lapsed(Some(now + Duration::hours(2)), now));
        assert!(entry.stay_lapsed(Some(now - Duration::minutes(1)), now));
    }

    #[test]
    fn test_stay_lapsed_ignores_retired_entries() {
        let now = Utc::now();
        let mut entry =
            WaitlistEntry::new(Uuid::new_v4(), Uuid::new_v4(), RentalTier::Double, None);
        entry.cancel(CancelReason::Staff, now).unwrap();

        assert!(!entry.stay_lapsed(Some(now - Duration::hours(1)), now));
    }
}
