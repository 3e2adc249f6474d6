use axum::{
    extract::State,
    http::Method,
    response::IntoResponse,
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod auth;
pub mod broadcast;
pub mod checkout;
pub mod error;
pub mod lanes;
pub mod middleware;
pub mod payments;
pub mod state;
pub mod visits;
pub mod waitlist;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let device = axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::auth::device_auth_middleware,
    );
    let staff = axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::auth::staff_auth_middleware,
    );
    let admin_only = axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::auth::admin_auth_middleware,
    );

    Router::new()
        .merge(auth::routes())
        .merge(payments::webhook_routes())
        .merge(lanes::routes().route_layer(device.clone()))
        .merge(waitlist::routes().route_layer(device))
        .merge(checkout::routes().route_layer(staff.clone()))
        .merge(visits::routes().route_layer(staff.clone()))
        .merge(payments::routes().route_layer(staff))
        .merge(admin::routes().route_layer(admin_only))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn rate_limit_middleware(
    State(state): State<AppState>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let ip = addr.ip().to_string();
    let key = format!("ratelimit:{}", ip);

    match state.redis.check_rate_limit(&key, 100, 60).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => Err((
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded",
        )),
        Err(_) => Ok(next.run(req).await), // Fail open
    }
}
