use banya_catalog::RentalTier;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{
    ActiveVisitSummary, BlockKind, Customer, OccupancyBlock, RenewalKind, ResourceRef, Visit,
    FINAL_EXTENSION_HOURS, INITIAL_BLOCK_HOURS, MAX_STAY_HOURS,
};

/// Round up to the next 15-minute boundary (display cleanliness for the
/// scheduled checkout time). Timestamps already on a boundary are kept.
pub fn round_up_quarter_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    let rounded = secs.div_euclid(900) * 900 + if secs.rem_euclid(900) == 0 { 0 } else { 900 };
    DateTime::from_timestamp(rounded, 0).unwrap_or(at)
}

/// One visit plus its chain of occupancy blocks
/// (INITIAL -> RENEWAL* -> FINAL_EXTENSION?).
#[derive(Debug, Clone)]
pub struct VisitAggregate {
    pub visit: Visit,
    pub blocks: Vec<OccupancyBlock>,
}

impl VisitAggregate {
    /// Check a customer in: fails if they carry a live ban, otherwise opens
    /// a visit with a fixed-length INITIAL block on the given resource.
    pub fn open_initial(
        customer: &Customer,
        tier: RentalTier,
        resource: ResourceRef,
        lane_session_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Self, VisitError> {
        if let Some(until) = customer.banned_until {
            if until > now {
                return Err(VisitError::Banned { until });
            }
        }

        let visit = Visit {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            started_at: now,
            ended_at: None,
        };

        let block = OccupancyBlock {
            id: Uuid::new_v4(),
            visit_id: visit.id,
            kind: BlockKind::Initial,
            tier,
            resource,
            starts_at: now,
            ends_at: round_up_quarter_hour(now + Duration::hours(INITIAL_BLOCK_HOURS)),
            agreement_signed: false,
            lane_session_id,
            created_at: now,
        };

        Ok(Self {
            visit,
            blocks: vec![block],
        })
    }

    pub fn from_parts(visit: Visit, mut blocks: Vec<OccupancyBlock>) -> Self {
        blocks.sort_by_key(|b| b.starts_at);
        Self { visit, blocks }
    }

    /// The block currently (or last) covering the stay.
    pub fn active_block(&self) -> Result<&OccupancyBlock, VisitError> {
        self.blocks.last().ok_or(VisitError::NoBlocks)
    }

    /// Scheduled checkout time: the end of the last block in the chain.
    pub fn checkout_at(&self) -> Result<DateTime<Utc>, VisitError> {
        Ok(self.active_block()?.ends_at)
    }

    /// Whole hours consumed by the chain so far. The quarter-hour rounding
    /// slack on the initial block is not counted against the ceiling.
    pub fn hours_used(&self) -> i64 {
        self.blocks.iter().map(|b| b.duration_hours()).sum()
    }

    pub fn final_extension_used(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| b.kind == BlockKind::FinalExtension)
    }

    pub fn final_extension_available(&self) -> bool {
        !self.final_extension_used() && self.hours_used() + FINAL_EXTENSION_HOURS <= MAX_STAY_HOURS
    }

    /// Append a renewal block. Renewals always extend contiguously from the
    /// scheduled checkout, never from the wall clock at renewal time.
    pub fn renew(
        &mut self,
        kind: RenewalKind,
        now: DateTime<Utc>,
    ) -> Result<&OccupancyBlock, VisitError> {
        if !self.visit.is_open() {
            return Err(VisitError::VisitEnded(self.visit.id));
        }

        let prior = self.active_block()?.clone();

        let (block_kind, hours) = match kind {
            RenewalKind::Hours(hours) => {
                if hours <= 0 {
                    return Err(VisitError::InvalidRenewal(hours));
                }
                (BlockKind::Renewal, hours)
            }
            RenewalKind::FinalExtension => {
                if self.final_extension_used() {
                    return Err(VisitError::FinalExtensionAlreadyUsed(self.visit.id));
                }
                (BlockKind::FinalExtension, FINAL_EXTENSION_HOURS)
            }
        };

        if self.hours_used() + hours > MAX_STAY_HOURS {
            return Err(VisitError::CeilingExceeded);
        }

        let block = OccupancyBlock {
            id: Uuid::new_v4(),
            visit_id: self.visit.id,
            kind: block_kind,
            // A final extension never changes tier-based pricing.
            tier: prior.tier,
            resource: prior.resource,
            starts_at: prior.ends_at,
            ends_at: prior.ends_at + Duration::hours(hours),
            agreement_signed: prior.agreement_signed,
            lane_session_id: None,
            created_at: now,
        };

        self.blocks.push(block);
        Ok(self.blocks.last().expect("block just pushed"))
    }

    /// Reassign the active block to a new resource (waitlist upgrade).
    /// Upgrades never extend a stay; the end time is untouched.
    pub fn upgrade(&mut self, new_resource: ResourceRef, new_tier: RentalTier) -> Result<&OccupancyBlock, VisitError> {
        if !self.visit.is_open() {
            return Err(VisitError::VisitEnded(self.visit.id));
        }

        let block = self.blocks.last_mut().ok_or(VisitError::NoBlocks)?;
        block.resource = new_resource;
        block.tier = new_tier;
        Ok(block)
    }

    pub fn summary(&self) -> Result<ActiveVisitSummary, VisitError> {
        let block = self.active_block()?;
        Ok(ActiveVisitSummary {
            visit_id: self.visit.id,
            customer_id: self.visit.customer_id,
            block_id: block.id,
            tier: block.tier,
            checkout_at: block.ends_at,
            hours_used: self.hours_used(),
            final_extension_available: self.final_extension_available(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VisitError {
    #[error("Customer is banned until {until}")]
    Banned { until: DateTime<Utc> },

    // The exact wording surfaces to the register UI.
    #[error("14-hour maximum")]
    CeilingExceeded,

    #[error("Final extension already used for visit {0}")]
    FinalExtensionAlreadyUsed(Uuid),

    #[error("Visit {0} has already ended")]
    VisitEnded(Uuid),

    #[error("Renewal hours must be positive, got {0}")]
    InvalidRenewal(i64),

    #[error("Visit has no occupancy blocks")]
    NoBlocks,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn customer() -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4(),
            full_name: "Test Customer".to_string(),
            membership_number: Some("M-1001".to_string()),
            membership_valid_until: None,
            past_due_cents: 0,
            banned_until: None,
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn room() -> ResourceRef {
        ResourceRef::Room(Uuid::new_v4())
    }

    #[test]
    fn test_round_up_quarter_hour() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 7, 33).unwrap();
        assert_eq!(
            round_up_quarter_hour(at),
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 15, 0).unwrap()
        );

        // Already on a boundary: unchanged.
        let exact = Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(round_up_quarter_hour(exact), exact);
    }

    #[test]
    fn test_open_initial_rounds_checkout_time() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 7, 0).unwrap();
        let agg =
            VisitAggregate::open_initial(&customer(), RentalTier::Standard, room(), None, now)
                .unwrap();

        let block = agg.active_block().unwrap();
        assert_eq!(block.kind, BlockKind::Initial);
        assert_eq!(
            block.ends_at,
            Utc.with_ymd_and_hms(2025, 3, 1, 16, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_open_initial_rejects_banned_customer() {
        let now = Utc::now();
        let mut banned = customer();
        banned.banned_until = Some(now + Duration::days(10));

        let result =
            VisitAggregate::open_initial(&banned, RentalTier::Standard, room(), None, now);
        assert!(matches!(result, Err(VisitError::Banned { .. })));
    }

    #[test]
    fn test_expired_ban_does_not_block_checkin() {
        let now = Utc::now();
        let mut was_banned = customer();
        was_banned.banned_until = Some(now - Duration::days(1));

        assert!(
            VisitAggregate::open_initial(&was_banned, RentalTier::Standard, room(), None, now)
                .is_ok()
        );
    }

    #[test]
    fn test_renewal_extends_from_scheduled_checkout() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut agg =
            VisitAggregate::open_initial(&customer(), RentalTier::Standard, room(), None, now)
                .unwrap();
        let scheduled_end = agg.checkout_at().unwrap();

        // Renewed well before checkout time; the new block still starts at
        // the scheduled end, not at the renewal wall clock.
        let renewed_at = now + Duration::hours(1);
        let block = agg.renew(RenewalKind::Hours(4), renewed_at).unwrap();
        assert_eq!(block.starts_at, scheduled_end);
        assert_eq!(block.ends_at, scheduled_end + Duration::hours(4));
    }

    #[test]
    fn test_ceiling_rejected_without_state_change() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut agg =
            VisitAggregate::open_initial(&customer(), RentalTier::Standard, room(), None, now)
                .unwrap();

        agg.renew(RenewalKind::Hours(6), now).unwrap(); // 12h used
        let before = agg.blocks.len();

        // 12 + 4 would cross 14 hours.
        let result = agg.renew(RenewalKind::Hours(4), now);
        assert!(matches!(result, Err(VisitError::CeilingExceeded)));
        assert_eq!(result.unwrap_err().to_string(), "14-hour maximum");
        assert_eq!(agg.blocks.len(), before);

        // Exactly reaching 14 is allowed.
        agg.renew(RenewalKind::Hours(2), now).unwrap();
        assert_eq!(agg.hours_used(), 14);
    }

    #[test]
    fn test_final_extension_once_and_flat() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut agg =
            VisitAggregate::open_initial(&customer(), RentalTier::Double, room(), None, now)
                .unwrap();

        assert!(agg.final_extension_available());
        let block = agg.renew(RenewalKind::FinalExtension, now).unwrap();
        assert_eq!(block.kind, BlockKind::FinalExtension);
        assert_eq!(block.duration_hours(), 2);
        assert_eq!(block.tier, RentalTier::Double);

        assert!(!agg.final_extension_available());
        assert!(matches!(
            agg.renew(RenewalKind::FinalExtension, now),
            Err(VisitError::FinalExtensionAlreadyUsed(_))
        ));
    }

    #[test]
    fn test_final_extension_unavailable_near_ceiling() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut agg =
            VisitAggregate::open_initial(&customer(), RentalTier::Standard, room(), None, now)
                .unwrap();
        agg.renew(RenewalKind::Hours(7), now).unwrap(); // 13h used

        // 13 + 2 crosses the ceiling.
        assert!(!agg.final_extension_available());
    }

    #[test]
    fn test_upgrade_keeps_end_time() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut agg =
            VisitAggregate::open_initial(&customer(), RentalTier::Standard, room(), None, now)
                .unwrap();
        let end_before = agg.checkout_at().unwrap();

        let new_room = ResourceRef::Room(Uuid::new_v4());
        let block = agg.upgrade(new_room, RentalTier::Double).unwrap();
        assert_eq!(block.resource, new_room);
        assert_eq!(block.tier, RentalTier::Double);
        assert_eq!(agg.checkout_at().unwrap(), end_before);
    }
}
