pub mod aggregate;
pub mod checkout;
pub mod models;

pub use aggregate::{VisitAggregate, VisitError};
pub use checkout::{CheckoutOutcome, CheckoutRequest, KeyResolution, Settlement};
pub use models::{
    ActiveVisitSummary, BlockKind, Customer, OccupancyBlock, RenewalKind, ResourceRef, Visit,
};
