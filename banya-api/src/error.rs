use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use banya_core::CoreError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    NotActiveError(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "VALIDATION", msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            // A dead lane session is its own conflict flavor so kiosks can
            // tell "refresh the lane" apart from an ordinary race loss.
            AppError::NotActiveError(msg) => (StatusCode::CONFLICT, "NOT_ACTIVE", msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "code": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => AppError::ValidationError(msg),
            CoreError::Conflict(msg) => AppError::ConflictError(msg),
            CoreError::NotFound(msg) => AppError::NotFoundError(msg),
            CoreError::Forbidden(msg) => AppError::AuthorizationError(msg),
            CoreError::NotActive(lane) => {
                AppError::NotActiveError(format!("Lane session is not active: {}", lane))
            }
            CoreError::Internal(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}
