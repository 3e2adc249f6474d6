use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use banya_catalog::{rental_base_cents, Quote, RentalTier};
use banya_lane::{LaneSession, MembershipIntent, Role};
use banya_shared::pii::Masked;
use banya_shared::DomainEvent;
use banya_visit::models::INITIAL_BLOCK_HOURS;

use crate::{error::AppError, middleware::auth::DeviceClaims, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/lanes/{lane}/session",
            post(start_session).get(get_session),
        )
        .route("/v1/lanes/{lane}/stream", get(stream_lane))
        .route(
            "/v1/lanes/{lane}/heartbeat",
            post(kiosk_heartbeat).get(kiosk_status),
        )
        .route("/v1/sessions/{id}/propose", post(propose))
        .route("/v1/sessions/{id}/confirm", post(confirm))
        .route("/v1/sessions/{id}/acknowledge", post(acknowledge))
        .route(
            "/v1/sessions/{id}/membership-intent",
            post(set_membership_intent),
        )
        .route("/v1/sessions/{id}/scan-id", post(scan_id))
        .route("/v1/sessions/{id}/scan-membership", post(scan_membership))
        .route("/v1/sessions/{id}/kiosk-ack", post(kiosk_ack))
        .route("/v1/sessions/{id}/reset", post(reset))
        .route("/v1/sessions/{id}/quote", get(quote))
        .route("/v1/availability", get(availability))
}

fn actor_role(claims: &DeviceClaims) -> Role {
    if claims.is_kiosk() {
        Role::Customer
    } else {
        Role::Employee
    }
}

fn session_event(claims: &DeviceClaims, session: &LaneSession) -> DomainEvent {
    if claims.is_kiosk() {
        DomainEvent::SessionUpdated {
            lane: session.lane.clone(),
            session_id: session.id,
        }
    } else {
        DomainEvent::RegisterSessionUpdated {
            lane: session.lane.clone(),
            session_id: session.id,
        }
    }
}

// ============================================================================
// Lane lifecycle
// ============================================================================

async fn start_session(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(lane): Path<String>,
) -> Result<Json<LaneSession>, AppError> {
    let session = state.lane_repo.start(&lane).await?;
    state.broadcaster.publish(session_event(&claims, &session));
    Ok(Json(session))
}

async fn get_session(
    State(state): State<AppState>,
    Path(lane): Path<String>,
) -> Result<Json<LaneSession>, AppError> {
    let session = state
        .lane_repo
        .get_active(&lane)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("No active session on lane {}", lane)))?;
    Ok(Json(session))
}

/// Per-lane push feed. The kiosk and register render from these instead of
/// polling; a dropped connection is re-established by the client.
async fn stream_lane(
    State(state): State<AppState>,
    Path(lane): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcaster.subscribe_lane(&lane);
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        let event = msg.ok()?;
        Event::default()
            .event(event.kind())
            .json_data(&event)
            .ok()
            .map(Ok)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

const KIOSK_HEARTBEAT_TTL_SECONDS: u64 = 30;

async fn kiosk_heartbeat(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(lane): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !claims.is_kiosk() {
        return Err(AppError::AuthorizationError(
            "Only the kiosk sends heartbeats".to_string(),
        ));
    }

    state
        .redis
        .set_kiosk_heartbeat(&lane, KIOSK_HEARTBEAT_TTL_SECONDS)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Heartbeat write failed: {}", e)))?;
    Ok(Json(serde_json::json!({"lane": lane, "alive": true})))
}

/// Lets the register flag a kiosk that stopped reporting.
async fn kiosk_status(
    State(state): State<AppState>,
    Path(lane): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let alive = state
        .redis
        .kiosk_alive(&lane)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Heartbeat read failed: {}", e)))?;
    Ok(Json(serde_json::json!({"lane": lane, "alive": alive})))
}

// ============================================================================
// Selection flow
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProposeRequest {
    tier: RentalTier,
}

async fn propose(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
    Json(body): Json<ProposeRequest>,
) -> Result<Json<LaneSession>, AppError> {
    let session = state
        .lane_repo
        .propose(id, body.tier, actor_role(&claims))
        .await?;
    state.broadcaster.publish(session_event(&claims, &session));
    Ok(Json(session))
}

async fn confirm(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<LaneSession>, AppError> {
    // First confirm wins; a lost race still returns the standing lock with
    // 200, and the caller sees confirmed_by to know who won.
    let session = state.lane_repo.confirm(id, actor_role(&claims)).await?;
    state.broadcaster.publish(session_event(&claims, &session));
    Ok(Json(session))
}

async fn acknowledge(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<LaneSession>, AppError> {
    let session = state
        .lane_repo
        .acknowledge(id, actor_role(&claims))
        .await?;
    state.broadcaster.publish(session_event(&claims, &session));
    Ok(Json(session))
}

// ============================================================================
// Session extras
// ============================================================================

#[derive(Debug, Deserialize)]
struct MembershipIntentRequest {
    intent: MembershipIntent,
}

async fn set_membership_intent(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
    Json(body): Json<MembershipIntentRequest>,
) -> Result<Json<LaneSession>, AppError> {
    let session = state.lane_repo.set_membership_intent(id, body.intent).await?;
    state.broadcaster.publish(session_event(&claims, &session));
    Ok(Json(session))
}

async fn scan_id(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<LaneSession>, AppError> {
    let session = state.lane_repo.mark_id_scanned(id).await?;
    state.broadcaster.publish(session_event(&claims, &session));
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct ScanMembershipRequest {
    membership_number: String,
}

async fn scan_membership(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
    Json(body): Json<ScanMembershipRequest>,
) -> Result<Json<LaneSession>, AppError> {
    tracing::info!(
        "Membership scan on session {}: {}",
        id,
        Masked(&body.membership_number)
    );

    // 1. Look up the member
    let customer = state
        .customer_repo
        .find_by_membership(&body.membership_number)
        .await?
        .ok_or_else(|| {
            AppError::NotFoundError(format!(
                "No member with number {}",
                body.membership_number
            ))
        })?;

    // 2. Bind to the session
    let session = state.lane_repo.bind_customer(id, customer.id, true).await?;
    state.broadcaster.publish(session_event(&claims, &session));
    Ok(Json(session))
}

async fn kiosk_ack(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<LaneSession>, AppError> {
    // Records that the customer saw the completion banner. The session
    // stays ACTIVE until staff reset the lane.
    let session = state.lane_repo.kiosk_ack(id).await?;
    state.broadcaster.publish(session_event(&claims, &session));
    Ok(Json(session))
}

async fn reset(
    State(state): State<AppState>,
    Extension(claims): Extension<DeviceClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<LaneSession>, AppError> {
    if claims.is_kiosk() {
        return Err(AppError::AuthorizationError(
            "Only staff can reset a lane".to_string(),
        ));
    }

    let session = state.lane_repo.reset(id).await?;
    state.broadcaster.publish(DomainEvent::SessionUpdated {
        lane: session.lane.clone(),
        session_id: session.id,
    });
    state.broadcaster.publish(DomainEvent::RegisterSessionUpdated {
        lane: session.lane.clone(),
        session_id: session.id,
    });
    Ok(Json(session))
}

// ============================================================================
// Quote
// ============================================================================

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    tier: RentalTier,
}

/// Lets the kiosk grey out tiers with nothing clean to hand over.
async fn availability(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<AvailabilityQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let resource = state.resource_repo.find_assignable(query.tier).await?;
    Ok(Json(serde_json::json!({
        "tier": query.tier.as_str(),
        "available": resource.is_some(),
    })))
}

async fn quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Quote>, AppError> {
    let session = state.lane_repo.get(id).await?;

    let tier = session.confirmed_tier.ok_or_else(|| {
        AppError::ValidationError("No confirmed selection to quote".to_string())
    })?;

    let mut quote = Quote::new();
    quote.push(
        format!("{} ({}h)", tier.as_str(), INITIAL_BLOCK_HOURS),
        rental_base_cents(tier, INITIAL_BLOCK_HOURS),
    );

    match session.membership_intent {
        Some(MembershipIntent::Purchase) => {
            quote.push(
                "Membership purchase",
                state.business_rules.membership_purchase_cents,
            );
        }
        Some(MembershipIntent::Renew) => {
            quote.push(
                "Membership renewal",
                state.business_rules.membership_renewal_cents,
            );
        }
        // Declined or undecided: rental only.
        Some(MembershipIntent::None) | None => {}
    }

    Ok(Json(quote))
}
