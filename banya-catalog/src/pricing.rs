use serde::{Deserialize, Serialize};

use crate::resource::RentalTier;

/// Late-fee policy, fixed by house rules:
/// under 30 minutes is forgiven, 30-59 costs $15, 60-89 costs $35,
/// and 90 minutes or more costs $35 plus a 30-day ban.
pub const LATE_GRACE_MINUTES: i64 = 30;
pub const LATE_TIER_TWO_MINUTES: i64 = 60;
pub const LATE_TIER_BAN_MINUTES: i64 = 90;
pub const LATE_FEE_TIER_ONE_CENTS: i32 = 1_500;
pub const LATE_FEE_TIER_TWO_CENTS: i32 = 3_500;
pub const LATE_BAN_DAYS: i64 = 30;

/// Result of mapping a lateness duration onto the fee policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LateFee {
    pub late_minutes: i64,
    pub fee_cents: i32,
    pub ban_days: Option<i64>,
}

/// Pure tier lookup. Bans never stack; the caller extends `banned_until`
/// from whichever of (existing ban, now + ban_days) is later.
pub fn late_fee(late_minutes: i64) -> LateFee {
    let late_minutes = late_minutes.max(0);

    let (fee_cents, ban_days) = if late_minutes < LATE_GRACE_MINUTES {
        (0, None)
    } else if late_minutes < LATE_TIER_TWO_MINUTES {
        (LATE_FEE_TIER_ONE_CENTS, None)
    } else if late_minutes < LATE_TIER_BAN_MINUTES {
        (LATE_FEE_TIER_TWO_CENTS, None)
    } else {
        (LATE_FEE_TIER_TWO_CENTS, Some(LATE_BAN_DAYS))
    };

    LateFee {
        late_minutes,
        fee_cents,
        ban_days,
    }
}

/// Base rate for a rental block of the given tier and length.
/// The first six hours are a flat package; further hours bill linearly.
pub fn rental_base_cents(tier: RentalTier, hours: i64) -> i32 {
    let (package_cents, hourly_cents) = match tier {
        RentalTier::Standard => (3_000, 600),
        RentalTier::Double => (4_500, 900),
        RentalTier::Special => (6_000, 1_200),
        RentalTier::Locker => (1_500, 300),
    };

    if hours <= 6 {
        package_cents
    } else {
        package_cents + ((hours - 6) as i32) * hourly_cents
    }
}

/// An itemized line within a quote or posted charge set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteItem {
    pub description: String,
    pub amount_cents: i32,
}

/// Itemized order total shown at the register before payment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Quote {
    pub items: Vec<QuoteItem>,
    pub total_cents: i32,
}

impl Quote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, description: impl Into<String>, amount_cents: i32) {
        self.total_cents += amount_cents;
        self.items.push(QuoteItem {
            description: description.into(),
            amount_cents,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_late_fee_tiers() {
        // 15 min late: forgiven
        let fee = late_fee(15);
        assert_eq!(fee.fee_cents, 0);
        assert_eq!(fee.ban_days, None);

        // 45 min late: $15
        let fee = late_fee(45);
        assert_eq!(fee.fee_cents, 1_500);
        assert_eq!(fee.ban_days, None);

        // 75 min late: $35, no ban
        let fee = late_fee(75);
        assert_eq!(fee.fee_cents, 3_500);
        assert_eq!(fee.ban_days, None);

        // 95 min late: $35 and a 30-day ban
        let fee = late_fee(95);
        assert_eq!(fee.fee_cents, 3_500);
        assert_eq!(fee.ban_days, Some(30));
    }

    #[test]
    fn test_late_fee_boundaries() {
        assert_eq!(late_fee(29).fee_cents, 0);
        assert_eq!(late_fee(30).fee_cents, 1_500);
        assert_eq!(late_fee(59).fee_cents, 1_500);
        assert_eq!(late_fee(60).fee_cents, 3_500);
        assert_eq!(late_fee(89).ban_days, None);
        assert_eq!(late_fee(90).ban_days, Some(30));
    }

    #[test]
    fn test_negative_lateness_is_clamped() {
        let fee = late_fee(-10);
        assert_eq!(fee.late_minutes, 0);
        assert_eq!(fee.fee_cents, 0);
    }

    #[test]
    fn test_rental_base_rates() {
        // Six-hour package is flat
        assert_eq!(rental_base_cents(RentalTier::Standard, 6), 3_000);
        // Extra hours bill linearly
        assert_eq!(rental_base_cents(RentalTier::Standard, 8), 4_200);
        assert_eq!(rental_base_cents(RentalTier::Locker, 6), 1_500);
    }

    #[test]
    fn test_quote_accumulates_total() {
        let mut quote = Quote::new();
        quote.push("Standard room (6h)", 3_000);
        quote.push("Membership purchase", 2_000);
        assert_eq!(quote.total_cents, 5_000);
        assert_eq!(quote.items.len(), 2);
    }
}
