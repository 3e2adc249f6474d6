use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use banya_catalog::{Resource, ResourceKind, ResourceStatus};
use banya_shared::DomainEvent;

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/resources", get(list_resources))
        .route("/v1/admin/resources/{id}", get(get_resource))
        .route("/v1/admin/resources/{id}/status", post(set_status))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    kind: Option<ResourceKind>,
}

async fn list_resources(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Resource>>, AppError> {
    let resources = state.resource_repo.list(query.kind).await?;
    Ok(Json(resources))
}

async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Resource>, AppError> {
    let resource = state.resource_repo.get(id).await?;
    Ok(Json(resource))
}

#[derive(Debug, Deserialize)]
struct SetStatusRequest {
    status: ResourceStatus,
}

/// Cleaning workflow endpoint. When a room reaches CLEAN it is immediately
/// run past the waitlist; a match turns into an offer before anyone can
/// walk up and take the room.
async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<Resource>, AppError> {
    // 1. Apply the status change
    let resource = state.resource_repo.set_status(id, body.status).await?;

    state.broadcaster.publish(DomainEvent::RoomStatusChanged {
        room_id: resource.id,
        status: resource.status.as_str().to_string(),
    });

    // 2. A freshly clean room goes straight to the queue
    if resource.status == ResourceStatus::Clean && resource.kind == ResourceKind::Room {
        crate::waitlist::sweep_expired(state.waitlist_repo.as_ref(), &state.broadcaster).await?;
        match state.waitlist_repo.offer_room(resource.id).await {
            Ok(Some(entry)) => {
                state.broadcaster.publish(DomainEvent::WaitlistUpdated {
                    entry_id: entry.id,
                    status: entry.status.as_str().to_string(),
                    reason: None,
                });
            }
            Ok(None) => {}
            // The offer pass is best-effort; the room is clean either way.
            Err(e) => tracing::warn!("Waitlist offer pass failed for room {}: {}", resource.id, e),
        }
    }

    state.broadcaster.publish(DomainEvent::InventoryUpdated {
        at: chrono::Utc::now(),
    });
    Ok(Json(resource))
}
