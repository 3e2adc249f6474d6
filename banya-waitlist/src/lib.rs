pub mod matcher;
pub mod models;

pub use matcher::{estimate_eta, position_of, WaitlistMatcher, CLEANING_BUFFER_MINUTES, OFFER_TTL_MINUTES};
pub use models::{CancelReason, WaitlistEntry, WaitlistError, WaitlistStatus};
