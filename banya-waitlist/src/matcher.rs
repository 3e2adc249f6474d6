use std::collections::HashMap;

use banya_catalog::RentalTier;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{WaitlistEntry, WaitlistStatus};

/// Housekeeping turnaround assumed between a scheduled checkout and the
/// room becoming assignable again.
pub const CLEANING_BUFFER_MINUTES: i64 = 15;
/// How long an offered room is held before the offer lapses.
pub const OFFER_TTL_MINUTES: i64 = 10;

/// Queue position of an entry: its rank by join time among live entries
/// waiting for the same desired tier. 1-based. Declined offers keep the
/// original join time, so the rank survives a decline.
pub fn position_of(entries: &[WaitlistEntry], entry_id: Uuid) -> Option<usize> {
    let target = entries.iter().find(|e| e.id == entry_id)?;
    if !target.is_live() {
        return None;
    }
    let rank = entries
        .iter()
        .filter(|e| {
            e.is_live()
                && e.desired_tier == target.desired_tier
                && (e.created_at, e.id) <= (target.created_at, target.id)
        })
        .count();
    Some(rank)
}

/// Earliest the next room of the tier could plausibly be ready: the soonest
/// scheduled checkout among occupied rooms of that tier, plus the cleaning
/// buffer. Overdue checkouts count as "now". None when nothing is occupied
/// (no basis for an estimate).
pub fn estimate_eta(
    occupied_ends: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let earliest = occupied_ends.iter().min()?;
    let basis = if *earliest > now { *earliest } else { now };
    Some(basis + Duration::minutes(CLEANING_BUFFER_MINUTES))
}

/// Matching policy over a snapshot of the queue. The store locks the
/// candidate rows and hands them here to pick the next in line.
#[derive(Debug, Clone)]
pub struct WaitlistMatcher {
    pub offer_ttl: Duration,
}

impl Default for WaitlistMatcher {
    fn default() -> Self {
        Self {
            offer_ttl: Duration::minutes(OFFER_TTL_MINUTES),
        }
    }
}

impl WaitlistMatcher {
    /// Lapse entries whose backing stay has ended, plus offers whose hold
    /// window has passed. `stay_ends` maps each visit to the scheduled end
    /// of its last block. Runs lazily before any read of the live queue;
    /// there is no background sweeper.
    pub fn expire_stale(
        &self,
        entries: &mut [WaitlistEntry],
        stay_ends: &HashMap<Uuid, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<Uuid> {
        let mut expired = Vec::new();
        for entry in entries.iter_mut() {
            let lapsed = entry.stay_lapsed(stay_ends.get(&entry.visit_id).copied(), now);
            if lapsed || entry.offer_stale(self.offer_ttl, now) {
                entry.expire(now);
                expired.push(entry.id);
            }
        }
        expired
    }

    /// Pick who gets a freed room of the given tier: the longest-waiting
    /// ACTIVE entry that wants it, as desired tier first, then as backup.
    pub fn next_for_tier<'a>(
        &self,
        entries: &'a mut [WaitlistEntry],
        stay_ends: &HashMap<Uuid, DateTime<Utc>>,
        tier: RentalTier,
        now: DateTime<Utc>,
    ) -> Option<&'a mut WaitlistEntry> {
        self.expire_stale(entries, stay_ends, now);

        let pick = |as_backup: bool| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| {
                    e.status == WaitlistStatus::Active
                        && if as_backup {
                            e.backup_tier == Some(tier)
                        } else {
                            e.desired_tier == tier
                        }
                })
                .min_by_key(|(_, e)| (e.created_at, e.id))
                .map(|(i, _)| i)
        };

        let idx = pick(false).or_else(|| pick(true))?;
        Some(&mut entries[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CancelReason;
    use chrono::TimeZone;

    fn entry(tier: RentalTier, joined_secs_ago: i64, now: DateTime<Utc>) -> WaitlistEntry {
        let mut e = WaitlistEntry::new(Uuid::new_v4(), Uuid::new_v4(), tier, None);
        e.created_at = now - Duration::seconds(joined_secs_ago);
        e
    }

    #[test]
    fn test_position_is_per_tier() {
        let now = Utc::now();
        let a = entry(RentalTier::Standard, 300, now);
        let b = entry(RentalTier::Double, 200, now);
        let c = entry(RentalTier::Standard, 100, now);
        let entries = vec![a.clone(), b.clone(), c.clone()];

        // The Double entry between them does not count against Standard.
        assert_eq!(position_of(&entries, a.id), Some(1));
        assert_eq!(position_of(&entries, c.id), Some(2));
        assert_eq!(position_of(&entries, b.id), Some(1));
    }

    #[test]
    fn test_declined_offer_keeps_position() {
        let now = Utc::now();
        let mut a = entry(RentalTier::Standard, 300, now);
        let b = entry(RentalTier::Standard, 100, now);

        a.offer(Uuid::new_v4(), now).unwrap();
        a.decline(now + Duration::minutes(2)).unwrap();

        let entries = vec![a.clone(), b.clone()];
        assert_eq!(position_of(&entries, a.id), Some(1));
        assert_eq!(position_of(&entries, b.id), Some(2));
    }

    #[test]
    fn test_cancelled_entry_has_no_position() {
        let now = Utc::now();
        let mut a = entry(RentalTier::Standard, 300, now);
        let b = entry(RentalTier::Standard, 100, now);
        a.cancel(CancelReason::CheckedOut, now).unwrap();

        let entries = vec![a.clone(), b.clone()];
        assert_eq!(position_of(&entries, a.id), None);
        assert_eq!(position_of(&entries, b.id), Some(1));
    }

    #[test]
    fn test_eta_from_earliest_checkout_plus_buffer() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let ends = vec![
            now + Duration::hours(3),
            now + Duration::hours(1),
            now + Duration::hours(5),
        ];
        assert_eq!(
            estimate_eta(&ends, now),
            Some(now + Duration::hours(1) + Duration::minutes(15))
        );
    }

    #[test]
    fn test_eta_overdue_checkout_counts_as_now() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let ends = vec![now - Duration::minutes(40)];
        assert_eq!(estimate_eta(&ends, now), Some(now + Duration::minutes(15)));
    }

    #[test]
    fn test_eta_none_when_nothing_occupied() {
        assert_eq!(estimate_eta(&[], Utc::now()), None);
    }

    #[test]
    fn test_stale_offers_lapse_lazily() {
        let now = Utc::now();
        let matcher = WaitlistMatcher::default();

        let mut fresh = entry(RentalTier::Standard, 600, now);
        fresh.offer(Uuid::new_v4(), now - Duration::minutes(5)).unwrap();
        let mut stale = entry(RentalTier::Standard, 900, now);
        stale.offer(Uuid::new_v4(), now - Duration::minutes(11)).unwrap();

        let mut entries = vec![fresh.clone(), stale.clone()];
        let expired = matcher.expire_stale(&mut entries, &HashMap::new(), now);

        assert_eq!(expired, vec![stale.id]);
        assert_eq!(entries[0].status, WaitlistStatus::Offered);
        assert_eq!(entries[1].status, WaitlistStatus::Expired);
    }

    #[test]
    fn test_ended_stay_lapses_even_while_active() {
        let now = Utc::now();
        let matcher = WaitlistMatcher::default();

        let gone = entry(RentalTier::Standard, 900, now);
        let staying = entry(RentalTier::Standard, 100, now);
        let stay_ends = HashMap::from([
            (gone.visit_id, now - Duration::minutes(20)),
            (staying.visit_id, now + Duration::hours(3)),
        ]);

        let mut entries = vec![gone.clone(), staying.clone()];
        let expired = matcher.expire_stale(&mut entries, &stay_ends, now);

        assert_eq!(expired, vec![gone.id]);
        assert_eq!(entries[0].status, WaitlistStatus::Expired);
        assert_eq!(entries[1].status, WaitlistStatus::Active);
    }

    #[test]
    fn test_next_for_tier_never_offers_to_an_ended_stay() {
        let now = Utc::now();
        let matcher = WaitlistMatcher::default();

        // Oldest in line, but their stay is already over.
        let gone = entry(RentalTier::Standard, 900, now);
        let staying = entry(RentalTier::Standard, 100, now);
        let stay_ends = HashMap::from([
            (gone.visit_id, now - Duration::minutes(20)),
            (staying.visit_id, now + Duration::hours(3)),
        ]);

        let mut entries = vec![gone.clone(), staying.clone()];
        let picked = matcher
            .next_for_tier(&mut entries, &stay_ends, RentalTier::Standard, now)
            .map(|e| e.id);
        assert_eq!(picked, Some(staying.id));
    }

    #[test]
    fn test_next_for_tier_prefers_desired_then_backup() {
        let now = Utc::now();
        let matcher = WaitlistMatcher::default();

        let mut backup_wanting = entry(RentalTier::Special, 900, now);
        backup_wanting.backup_tier = Some(RentalTier::Double);
        let desired_wanting = entry(RentalTier::Double, 100, now);

        let mut entries = vec![backup_wanting.clone(), desired_wanting.clone()];
        let picked = matcher
            .next_for_tier(&mut entries, &HashMap::new(), RentalTier::Double, now)
            .map(|e| e.id);
        // The newer entry wins because Double is its desired tier.
        assert_eq!(picked, Some(desired_wanting.id));

        let mut entries = vec![backup_wanting.clone()];
        let picked = matcher
            .next_for_tier(&mut entries, &HashMap::new(), RentalTier::Double, now)
            .map(|e| e.id);
        assert_eq!(picked, Some(backup_wanting.id));
    }

    #[test]
    fn test_next_for_tier_skips_offered_entries() {
        let now = Utc::now();
        let matcher = WaitlistMatcher::default();

        let mut offered = entry(RentalTier::Standard, 900, now);
        offered.offer(Uuid::new_v4(), now).unwrap();
        let waiting = entry(RentalTier::Standard, 100, now);

        let mut entries = vec![offered, waiting.clone()];
        let picked = matcher
            .next_for_tier(&mut entries, &HashMap::new(), RentalTier::Standard, now)
            .map(|e| e.id);
        assert_eq!(picked, Some(waiting.id));
    }
}
