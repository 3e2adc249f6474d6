use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use banya_catalog::RentalTier;
use banya_shared::DomainEvent;
use banya_visit::{ActiveVisitSummary, Customer, RenewalKind};

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/customers", post(create_customer))
        .route("/v1/visits", post(open_visit))
        .route("/v1/visits/active", get(active_by_membership))
        .route("/v1/visits/{id}", get(get_visit))
        .route("/v1/visits/{id}/renew", post(renew))
        .route("/v1/blocks/{id}", get(get_block))
        .route("/v1/blocks/{id}/agreement", post(sign_agreement))
}

#[derive(Debug, Deserialize)]
struct CreateCustomerRequest {
    full_name: String,
}

/// Walk-ins get a bare customer record; membership comes later if at all.
async fn create_customer(
    State(state): State<AppState>,
    Json(body): Json<CreateCustomerRequest>,
) -> Result<Json<Customer>, AppError> {
    let customer = state.customer_repo.create(&body.full_name).await?;
    Ok(Json(customer))
}

#[derive(Debug, Deserialize)]
struct OpenVisitRequest {
    customer_id: Uuid,
    tier: RentalTier,
    lane_session_id: Option<Uuid>,
}

async fn open_visit(
    State(state): State<AppState>,
    Json(body): Json<OpenVisitRequest>,
) -> Result<Json<ActiveVisitSummary>, AppError> {
    let summary = state
        .visit_repo
        .open_initial(body.customer_id, body.tier, body.lane_session_id)
        .await?;

    state.broadcaster.publish(DomainEvent::InventoryUpdated {
        at: chrono::Utc::now(),
    });
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct RenewRequest {
    /// "HOURS" with an hour count, or "FINAL_EXTENSION".
    kind: String,
    hours: Option<i64>,
}

async fn renew(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RenewRequest>,
) -> Result<Json<ActiveVisitSummary>, AppError> {
    let kind = match body.kind.as_str() {
        "HOURS" => {
            let hours = body.hours.ok_or_else(|| {
                AppError::ValidationError("Renewal by hours needs an hour count".to_string())
            })?;
            RenewalKind::Hours(hours)
        }
        "FINAL_EXTENSION" => RenewalKind::FinalExtension,
        other => {
            return Err(AppError::ValidationError(format!(
                "Unknown renewal kind: {}",
                other
            )))
        }
    };

    let summary = state.visit_repo.renew(id, kind).await?;
    Ok(Json(summary))
}

async fn get_visit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActiveVisitSummary>, AppError> {
    let agg = state.visit_repo.get_aggregate(id).await?;
    let summary = agg.summary().map_err(|e| {
        AppError::InternalServerError(format!("Visit {} has no blocks: {}", id, e))
    })?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct ActiveQuery {
    membership: String,
}

async fn active_by_membership(
    State(state): State<AppState>,
    Query(query): Query<ActiveQuery>,
) -> Result<Json<Vec<ActiveVisitSummary>>, AppError> {
    let summaries = state
        .visit_repo
        .active_by_membership(&query.membership)
        .await?;
    Ok(Json(summaries))
}

async fn get_block(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<banya_visit::OccupancyBlock>, AppError> {
    let block = state.visit_repo.get_block(id).await?;
    Ok(Json(block))
}

async fn sign_agreement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.visit_repo.sign_agreement(id).await?;
    Ok(Json(serde_json::json!({"block_id": id, "agreement_signed": true})))
}
