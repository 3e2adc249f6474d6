pub mod session;

pub use session::{
    LaneError, LaneSession, MembershipIntent, PaymentState, Role, SelectionLock, SessionStatus,
};
