pub mod pricing;
pub mod resource;

pub use pricing::{late_fee, rental_base_cents, LateFee, Quote, QuoteItem};
pub use resource::{RentalTier, Resource, ResourceKind, ResourceStatus};
