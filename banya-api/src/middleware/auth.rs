use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

/// One claims shape for every device at the counter. `lane` is set for
/// kiosk tokens and absent for register and admin tokens.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeviceClaims {
    pub sub: String,
    pub lane: Option<String>,
    pub role: String,
    pub exp: usize,
}

impl DeviceClaims {
    pub fn is_kiosk(&self) -> bool {
        self.role == "KIOSK"
    }
}

fn decode_claims(req: &Request, secret: &str) -> Result<DeviceClaims, StatusCode> {
    // 1. Extract token from Authorization header
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Decode and validate JWT
    let token_data = decode::<DeviceClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    Ok(token_data.claims)
}

// ============================================================================
// Device Authentication Middleware (kiosk or register)
// ============================================================================

pub async fn device_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = decode_claims(&req, &state.auth.secret)?;

    if claims.role != "KIOSK" && claims.role != "REGISTER" && claims.role != "ADMIN" {
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

// ============================================================================
// Staff Authentication Middleware (register or admin)
// ============================================================================

pub async fn staff_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = decode_claims(&req, &state.auth.secret)?;

    if claims.role != "REGISTER" && claims.role != "ADMIN" {
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

// ============================================================================
// Admin Authentication Middleware
// ============================================================================

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = decode_claims(&req, &state.auth.secret)?;

    if claims.role != "ADMIN" {
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
