use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rental class of a resource. Rooms come in three classes; lockers are
/// their own tier so the waitlist can treat them uniformly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RentalTier {
    Standard,
    Double,
    Special,
    Locker,
}

impl RentalTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RentalTier::Standard => "STANDARD",
            RentalTier::Double => "DOUBLE",
            RentalTier::Special => "SPECIAL",
            RentalTier::Locker => "LOCKER",
        }
    }
}

impl std::str::FromStr for RentalTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STANDARD" => Ok(RentalTier::Standard),
            "DOUBLE" => Ok(RentalTier::Double),
            "SPECIAL" => Ok(RentalTier::Special),
            "LOCKER" => Ok(RentalTier::Locker),
            other => Err(format!("Unknown rental tier: {}", other)),
        }
    }
}

impl std::fmt::Display for RentalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Room,
    Locker,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Room => "ROOM",
            ResourceKind::Locker => "LOCKER",
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROOM" => Ok(ResourceKind::Room),
            "LOCKER" => Ok(ResourceKind::Locker),
            other => Err(format!("Unknown resource kind: {}", other)),
        }
    }
}

/// Cleaning lifecycle. Checkout drives OCCUPIED -> DIRTY; the cleaning
/// workflow (a collaborator) advances DIRTY -> CLEANING -> CLEAN.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Dirty,
    Cleaning,
    Clean,
    Occupied,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Dirty => "DIRTY",
            ResourceStatus::Cleaning => "CLEANING",
            ResourceStatus::Clean => "CLEAN",
            ResourceStatus::Occupied => "OCCUPIED",
        }
    }
}

impl std::str::FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DIRTY" => Ok(ResourceStatus::Dirty),
            "CLEANING" => Ok(ResourceStatus::Cleaning),
            "CLEAN" => Ok(ResourceStatus::Clean),
            "OCCUPIED" => Ok(ResourceStatus::Occupied),
            other => Err(format!("Unknown resource status: {}", other)),
        }
    }
}

/// A room or locker as held in inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub kind: ResourceKind,
    pub number: String,
    pub tier: RentalTier,
    pub status: ResourceStatus,
    pub assigned_customer_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn is_assignable(&self) -> bool {
        self.status == ResourceStatus::Clean && self.assigned_customer_id.is_none()
    }
}
