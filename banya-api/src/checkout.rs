use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use banya_shared::DomainEvent;
use banya_visit::{CheckoutOutcome, CheckoutRequest, KeyResolution};

use crate::{
    broadcast::Broadcaster, error::AppError, middleware::auth::DeviceClaims, state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/checkout/resolve", post(resolve_key))
        .route("/v1/checkout/requests", post(create_request).get(open_requests))
        .route("/v1/checkout/requests/{id}", get(get_request))
        .route("/v1/checkout/requests/{id}/claim", post(claim))
        .route("/v1/checkout/requests/{id}/confirm-items", post(confirm_items))
        .route("/v1/checkout/requests/{id}/fee-paid", post(mark_fee_paid))
        .route("/v1/checkout/requests/{id}/complete", post(complete))
        .route("/v1/checkout/overdue", get(overdue))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    key_token: String,
}

/// Key scan at the register: maps a physical key to the stay it belongs to,
/// with a settlement preview against the wall clock.
async fn resolve_key(
    State(state): State<AppState>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<KeyResolution>, AppError> {
    let resolution = state.checkout_repo.resolve_key(&body.key_token).await?;
    Ok(Json(resolution))
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    block_id: Uuid,
}

async fn create_request(
    State(state): State<AppState>,
    Json(body): Json<CreateRequest>,
) -> Result<Json<CheckoutRequest>, AppError> {
    // Checklist template comes from house rules; every item starts
    // unconfirmed.
    let checklist = json!(state
        .business_rules
        .checkout_checklist
        .iter()
        .map(|item| (item.clone(), false))
        .collect::<std::collections::BTreeMap<_, _>>());

    let request = state
        .checkout_repo
        .create_request(body.block_id, checklist)
        .await?;

    state.broadcaster.publish(DomainEvent::CheckoutRequested {
        request_id: request.id,
        block_id: request.block_id,
        lane: None,
    });
    Ok(Json(request))
}

async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckoutRequest>, AppError> {
    let request = state.checkout_repo.get_request(id).await?;
    Ok(Json(request))
}

async fn claim(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckoutRequest>, AppError> {
    let request = state.checkout_repo.claim(id, &claims.sub).await?;
    Ok(Json(request))
}

async fn confirm_items(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckoutRequest>, AppError> {
    let request = state.checkout_repo.confirm_items(id, &claims.sub).await?;
    Ok(Json(request))
}

async fn mark_fee_paid(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckoutRequest>, AppError> {
    let request = state.checkout_repo.mark_fee_paid(id, &claims.sub).await?;
    Ok(Json(request))
}

/// Push the facts of a committed completion: the checkout itself, one
/// update per waitlist entry retired with the visit, and the freed
/// inventory. A replay is old news and publishes nothing.
pub(crate) fn publish_completion(hub: &Broadcaster, outcome: &CheckoutOutcome) {
    if outcome.already_checked_out {
        return;
    }
    hub.publish(DomainEvent::CheckoutCompleted {
        block_id: outcome.block_id,
        visit_id: outcome.visit_id,
        late_minutes: outcome.settlement.late_minutes,
        fee_cents: outcome.settlement.fee_cents,
        ban_applied: outcome.settlement.ban_applied,
    });
    for entry_id in &outcome.cancelled_waitlist_entries {
        hub.publish(DomainEvent::WaitlistUpdated {
            entry_id: *entry_id,
            status: "CANCELLED".to_string(),
            reason: Some("CHECKED_OUT".to_string()),
        });
    }
    hub.publish(DomainEvent::InventoryUpdated {
        at: outcome.completed_at,
    });
}

async fn complete(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckoutOutcome>, AppError> {
    // 1. Run the completion transaction
    let outcome = state.checkout_repo.complete(id, &claims.sub).await?;

    // 2. Push facts only after commit
    publish_completion(&state.broadcaster, &outcome);

    Ok(Json(outcome))
}

async fn open_requests(
    State(state): State<AppState>,
) -> Result<Json<Vec<CheckoutRequest>>, AppError> {
    let requests = state.checkout_repo.open_requests().await?;
    Ok(Json(requests))
}

/// Overdue stays with no request yet: the register's manual checkout list.
async fn overdue(
    State(state): State<AppState>,
) -> Result<Json<Vec<KeyResolution>>, AppError> {
    let blocks = state.checkout_repo.overdue_blocks().await?;
    Ok(Json(blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use banya_visit::Settlement;
    use chrono::Utc;

    fn outcome(already_checked_out: bool, cancelled: Vec<Uuid>) -> CheckoutOutcome {
        CheckoutOutcome {
            visit_id: Uuid::new_v4(),
            block_id: Uuid::new_v4(),
            settlement: Settlement {
                late_minutes: 45,
                fee_cents: 1_500,
                ban_applied: false,
            },
            completed_at: Utc::now(),
            already_checked_out,
            cancelled_waitlist_entries: cancelled,
        }
    }

    #[tokio::test]
    async fn test_replayed_completion_publishes_nothing() {
        let hub = Broadcaster::new();
        let mut rx = hub.subscribe_global();

        publish_completion(&hub, &outcome(true, vec![Uuid::new_v4()]));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_completion_fans_out_per_cancelled_entry() {
        let hub = Broadcaster::new();
        let mut rx = hub.subscribe_global();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let done = outcome(false, vec![first, second]);
        publish_completion(&hub, &done);

        match rx.recv().await.unwrap() {
            DomainEvent::CheckoutCompleted {
                block_id,
                fee_cents,
                ..
            } => {
                assert_eq!(block_id, done.block_id);
                assert_eq!(fee_cents, 1_500);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        for expected in [first, second] {
            match rx.recv().await.unwrap() {
                DomainEvent::WaitlistUpdated {
                    entry_id,
                    status,
                    reason,
                } => {
                    assert_eq!(entry_id, expected);
                    assert_eq!(status, "CANCELLED");
                    assert_eq!(reason.as_deref(), Some("CHECKED_OUT"));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            DomainEvent::InventoryUpdated { .. }
        ));
        assert!(rx.try_recv().is_err());
    }
}
