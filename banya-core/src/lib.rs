pub mod payment;
pub mod repository;

/// Error taxonomy shared by every state-changing operation.
///
/// `NotActive` is the lane-session specific conflict (operating on a missing
/// or already-completed session); `AlreadyDone` conditions are not errors and
/// are reported through result flags instead.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Lane session is not active: {0}")]
    NotActive(String),
    #[error("Internal service error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
