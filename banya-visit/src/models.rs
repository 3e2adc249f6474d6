use banya_catalog::RentalTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard ceiling on the summed duration of all blocks in one visit.
pub const MAX_STAY_HOURS: i64 = 14;
/// Fixed length of the INITIAL block created at check-in.
pub const INITIAL_BLOCK_HOURS: i64 = 6;
/// Fixed length of the once-per-visit flat-fee final extension.
pub const FINAL_EXTENSION_HOURS: i64 = 2;

/// A customer record. Never deleted, only updated; checkout fee posting and
/// membership flows are the writers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub full_name: String,
    pub membership_number: Option<String>,
    pub membership_valid_until: Option<DateTime<Utc>>,
    pub past_due_cents: i32,
    pub banned_until: Option<DateTime<Utc>>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        self.banned_until.map(|until| until > now).unwrap_or(false)
    }
}

/// One customer's continuous stay. `ended_at` is null while open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Visit {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockKind {
    Initial,
    Renewal,
    FinalExtension,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Initial => "INITIAL",
            BlockKind::Renewal => "RENEWAL",
            BlockKind::FinalExtension => "FINAL_EXTENSION",
        }
    }
}

impl std::str::FromStr for BlockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIAL" => Ok(BlockKind::Initial),
            "RENEWAL" => Ok(BlockKind::Renewal),
            "FINAL_EXTENSION" => Ok(BlockKind::FinalExtension),
            other => Err(format!("Unknown block kind: {}", other)),
        }
    }
}

/// The one resource a block is bound to: a room or a locker, never both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind", content = "id")]
pub enum ResourceRef {
    Room(Uuid),
    Locker(Uuid),
}

impl ResourceRef {
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            ResourceRef::Room(id) => Some(*id),
            ResourceRef::Locker(_) => None,
        }
    }

    pub fn locker_id(&self) -> Option<Uuid> {
        match self {
            ResourceRef::Room(_) => None,
            ResourceRef::Locker(id) => Some(*id),
        }
    }
}

/// A contiguous time window within a visit, bound to exactly one resource
/// and one rental tier. Immutable once created except for the
/// agreement-signed flag; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyBlock {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub kind: BlockKind,
    pub tier: RentalTier,
    pub resource: ResourceRef,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub agreement_signed: bool,
    pub lane_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OccupancyBlock {
    pub fn duration_hours(&self) -> i64 {
        (self.ends_at - self.starts_at).num_hours()
    }
}

/// What a renewal asks for: extra tier-priced hours, or the once-only
/// flat-fee final extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind", content = "hours")]
pub enum RenewalKind {
    Hours(i64),
    FinalExtension,
}

/// Row returned by the active-visits-by-membership query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveVisitSummary {
    pub visit_id: Uuid,
    pub customer_id: Uuid,
    pub block_id: Uuid,
    pub tier: RentalTier,
    pub checkout_at: DateTime<Utc>,
    pub hours_used: i64,
    pub final_extension_available: bool,
}
