use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use banya_catalog::RentalTier;
use banya_core::repository::{WaitlistRepository, WaitlistStanding};
use banya_shared::DomainEvent;
use banya_visit::ActiveVisitSummary;
use banya_waitlist::{CancelReason, WaitlistEntry};

use crate::{
    broadcast::Broadcaster, error::AppError, middleware::auth::DeviceClaims, state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/waitlist", post(join).get(list_active))
        .route("/v1/waitlist/{id}", get(standing))
        .route("/v1/waitlist/{id}/accept", post(accept_offer))
        .route("/v1/waitlist/{id}/decline", post(decline_offer))
        .route("/v1/waitlist/{id}/cancel", post(cancel))
}

/// Run the lazy expiry sweep and push one update per retired entry. Every
/// read of the live queue goes through here first; there is no background
/// sweeper.
pub(crate) async fn sweep_expired(
    repo: &dyn WaitlistRepository,
    hub: &Broadcaster,
) -> Result<(), AppError> {
    for entry_id in repo.expire_stale().await? {
        hub.publish(DomainEvent::WaitlistUpdated {
            entry_id,
            status: "EXPIRED".to_string(),
            reason: None,
        });
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    visit_id: Uuid,
    desired_tier: RentalTier,
    backup_tier: Option<RentalTier>,
}

async fn join(
    State(state): State<AppState>,
    Json(body): Json<JoinRequest>,
) -> Result<Json<WaitlistStanding>, AppError> {
    // 1. Settle staleness first so the reported position is honest
    sweep_expired(state.waitlist_repo.as_ref(), &state.broadcaster).await?;

    // 2. Insert the entry and rank it
    let standing = state
        .waitlist_repo
        .join(body.visit_id, body.desired_tier, body.backup_tier)
        .await?;

    state.broadcaster.publish(DomainEvent::WaitlistUpdated {
        entry_id: standing.entry.id,
        status: standing.entry.status.as_str().to_string(),
        reason: None,
    });
    Ok(Json(standing))
}

/// Position and ETA for one entry. Stale entries lapse (and are announced)
/// before the read.
async fn standing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WaitlistStanding>, AppError> {
    sweep_expired(state.waitlist_repo.as_ref(), &state.broadcaster).await?;
    let standing = state.waitlist_repo.standing(id).await?;
    Ok(Json(standing))
}

async fn list_active(
    State(state): State<AppState>,
) -> Result<Json<Vec<WaitlistEntry>>, AppError> {
    sweep_expired(state.waitlist_repo.as_ref(), &state.broadcaster).await?;
    let entries = state.waitlist_repo.list_active().await?;
    Ok(Json(entries))
}

async fn accept_offer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActiveVisitSummary>, AppError> {
    // Moves the stay into the offered room; the checkout time does not move.
    let summary = state.waitlist_repo.accept_offer(id).await?;

    state.broadcaster.publish(DomainEvent::WaitlistUpdated {
        entry_id: id,
        status: "CANCELLED".to_string(),
        reason: Some("FULFILLED".to_string()),
    });
    state.broadcaster.publish(DomainEvent::InventoryUpdated {
        at: chrono::Utc::now(),
    });
    Ok(Json(summary))
}

async fn decline_offer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WaitlistEntry>, AppError> {
    let entry = state.waitlist_repo.decline_offer(id).await?;

    state.broadcaster.publish(DomainEvent::WaitlistUpdated {
        entry_id: entry.id,
        status: entry.status.as_str().to_string(),
        reason: None,
    });
    Ok(Json(entry))
}

async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<WaitlistEntry>, AppError> {
    if claims.is_kiosk() {
        return Err(AppError::AuthorizationError(
            "Only staff can cancel a waitlist entry".to_string(),
        ));
    }

    let entry = state.waitlist_repo.cancel(id, CancelReason::Staff).await?;

    state.broadcaster.publish(DomainEvent::WaitlistUpdated {
        entry_id: entry.id,
        status: entry.status.as_str().to_string(),
        reason: entry.cancel_reason.map(|r| r.as_str().to_string()),
    });
    Ok(Json(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use banya_core::CoreResult;

    struct FixedSweepRepo {
        expired: Vec<Uuid>,
    }

    #[async_trait]
    impl WaitlistRepository for FixedSweepRepo {
        async fn expire_stale(&self) -> CoreResult<Vec<Uuid>> {
            Ok(self.expired.clone())
        }

        async fn join(
            &self,
            _visit_id: Uuid,
            _desired_tier: RentalTier,
            _backup_tier: Option<RentalTier>,
        ) -> CoreResult<WaitlistStanding> {
            unimplemented!()
        }

        async fn standing(&self, _entry_id: Uuid) -> CoreResult<WaitlistStanding> {
            unimplemented!()
        }

        async fn list_active(&self) -> CoreResult<Vec<WaitlistEntry>> {
            unimplemented!()
        }

        async fn offer_room(&self, _room_id: Uuid) -> CoreResult<Option<WaitlistEntry>> {
            unimplemented!()
        }

        async fn accept_offer(&self, _entry_id: Uuid) -> CoreResult<ActiveVisitSummary> {
            unimplemented!()
        }

        async fn decline_offer(&self, _entry_id: Uuid) -> CoreResult<WaitlistEntry> {
            unimplemented!()
        }

        async fn cancel(
            &self,
            _entry_id: Uuid,
            _reason: CancelReason,
        ) -> CoreResult<WaitlistEntry> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_sweep_announces_each_expired_entry() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let repo = FixedSweepRepo {
            expired: vec![first, second],
        };
        let hub = Broadcaster::new();
        let mut rx = hub.subscribe_global();

        sweep_expired(&repo, &hub).await.unwrap();

        for expected in [first, second] {
            match rx.recv().await.unwrap() {
                DomainEvent::WaitlistUpdated {
                    entry_id,
                    status,
                    reason,
                } => {
                    assert_eq!(entry_id, expected);
                    assert_eq!(status, "EXPIRED");
                    assert!(reason.is_none());
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_stale_is_silent() {
        let repo = FixedSweepRepo { expired: vec![] };
        let hub = Broadcaster::new();
        let mut rx = hub.subscribe_global();

        sweep_expired(&repo, &hub).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
