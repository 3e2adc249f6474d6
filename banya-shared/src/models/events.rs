use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Domain events pushed to lane subscribers and the dashboard stream.
///
/// Events are emitted strictly after the originating store commit; delivery
/// is best-effort and clients reconcile with a follow-up read.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    SessionUpdated {
        lane: String,
        session_id: Uuid,
    },
    RegisterSessionUpdated {
        lane: String,
        session_id: Uuid,
    },
    CheckoutRequested {
        request_id: Uuid,
        block_id: Uuid,
        lane: Option<String>,
    },
    CheckoutCompleted {
        block_id: Uuid,
        visit_id: Uuid,
        late_minutes: i64,
        fee_cents: i32,
        ban_applied: bool,
    },
    WaitlistUpdated {
        entry_id: Uuid,
        status: String,
        reason: Option<String>,
    },
    RoomStatusChanged {
        room_id: Uuid,
        status: String,
    },
    InventoryUpdated {
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short tag used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::SessionUpdated { .. } => "SESSION_UPDATED",
            DomainEvent::RegisterSessionUpdated { .. } => "REGISTER_SESSION_UPDATED",
            DomainEvent::CheckoutRequested { .. } => "CHECKOUT_REQUESTED",
            DomainEvent::CheckoutCompleted { .. } => "CHECKOUT_COMPLETED",
            DomainEvent::WaitlistUpdated { .. } => "WAITLIST_UPDATED",
            DomainEvent::RoomStatusChanged { .. } => "ROOM_STATUS_CHANGED",
            DomainEvent::InventoryUpdated { .. } => "INVENTORY_UPDATED",
        }
    }
}
