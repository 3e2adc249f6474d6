use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, middleware::auth::DeviceClaims, state::AppState};

#[derive(Debug, Deserialize)]
struct KioskLoginRequest {
    lane: String,
}

#[derive(Debug, Deserialize)]
struct StaffLoginRequest {
    staff_id: String,
    #[serde(default)]
    admin: bool,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/kiosk", post(login_kiosk))
        .route("/v1/auth/staff", post(login_staff))
}

async fn login_kiosk(
    State(state): State<AppState>,
    Json(body): Json<KioskLoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let claims = DeviceClaims {
        sub: format!("kiosk-{}", Uuid::new_v4()),
        lane: Some(body.lane),
        role: "KIOSK".to_owned(),
        exp: (Utc::now() + Duration::seconds(state.auth.expiration as i64)).timestamp() as usize,
    };

    issue(&state, &claims)
}

async fn login_staff(
    State(state): State<AppState>,
    Json(body): Json<StaffLoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let role = if body.admin { "ADMIN" } else { "REGISTER" };
    let claims = DeviceClaims {
        sub: body.staff_id,
        lane: None,
        role: role.to_owned(),
        exp: (Utc::now() + Duration::seconds(state.auth.expiration as i64)).timestamp() as usize,
    };

    issue(&state, &claims)
}

fn issue(state: &AppState, claims: &DeviceClaims) -> Result<Json<AuthResponse>, AppError> {
    let token = encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(state.auth.secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))?;

    Ok(Json(AuthResponse { token }))
}
