use banya_catalog::RentalTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of the lane performed an action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "CUSTOMER",
            Role::Employee => "EMPLOYEE",
        }
    }

    pub fn other(&self) -> Role {
        match self {
            Role::Customer => Role::Employee,
            Role::Employee => Role::Customer,
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CUSTOMER" => Ok(Role::Customer),
            "EMPLOYEE" => Ok(Role::Employee),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "COMPLETED" => Ok(SessionStatus::Completed),
            other => Err(format!("Unknown session status: {}", other)),
        }
    }
}

/// Membership purchase intent. `None` here is a deliberate, persisted clear:
/// downstream quoting must distinguish "customer declined" from
/// "not yet decided" (which is the absent value on the session).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipIntent {
    Purchase,
    Renew,
    None,
}

impl MembershipIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipIntent::Purchase => "PURCHASE",
            MembershipIntent::Renew => "RENEW",
            MembershipIntent::None => "NONE",
        }
    }
}

impl std::str::FromStr for MembershipIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PURCHASE" => Ok(MembershipIntent::Purchase),
            "RENEW" => Ok(MembershipIntent::Renew),
            "NONE" => Ok(MembershipIntent::None),
            other => Err(format!("Unknown membership intent: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    None,
    Pending,
    Paid,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::None => "NONE",
            PaymentState::Pending => "PENDING",
            PaymentState::Paid => "PAID",
        }
    }
}

impl std::str::FromStr for PaymentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(PaymentState::None),
            "PENDING" => Ok(PaymentState::Pending),
            "PAID" => Ok(PaymentState::Paid),
            other => Err(format!("Unknown payment state: {}", other)),
        }
    }
}

/// The outcome of a confirm call: the tier that is now locked in and who
/// locked it. Repeated confirms return the same lock unchanged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionLock {
    pub tier: RentalTier,
    pub confirmed_by: Role,
    pub locked_at: DateTime<Utc>,
}

/// Per-lane transaction record coordinating the kiosk and the register.
///
/// The kiosk and register are separate devices with independently lagging
/// views, so "customer saw the completion banner" (kiosk_acked_at) is kept
/// apart from "transaction is over" (status = COMPLETED, staff reset only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneSession {
    pub id: Uuid,
    pub lane: String,
    pub status: SessionStatus,
    pub customer_id: Option<Uuid>,
    pub proposed_tier: Option<RentalTier>,
    pub proposed_by: Option<Role>,
    pub selection_confirmed: bool,
    pub confirmed_tier: Option<RentalTier>,
    pub confirmed_by: Option<Role>,
    pub locked_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<Role>,
    pub membership_intent: Option<MembershipIntent>,
    pub payment_intent_ref: Option<String>,
    pub payment_state: PaymentState,
    pub id_scanned: bool,
    pub membership_scanned: bool,
    pub agreement_signed: bool,
    pub kiosk_acked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LaneSession {
    pub fn new(lane: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lane: lane.into(),
            status: SessionStatus::Active,
            customer_id: None,
            proposed_tier: None,
            proposed_by: None,
            selection_confirmed: false,
            confirmed_tier: None,
            confirmed_by: None,
            locked_at: None,
            acknowledged_by: None,
            membership_intent: None,
            payment_intent_ref: None,
            payment_state: PaymentState::None,
            id_scanned: false,
            membership_scanned: false,
            agreement_signed: false,
            kiosk_acked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn require_active(&self) -> Result<(), LaneError> {
        if self.status != SessionStatus::Active {
            return Err(LaneError::NotActive(self.lane.clone()));
        }
        Ok(())
    }

    /// Record a candidate rental type. Overwrite is allowed from either side
    /// until the selection is locked; after the lock the call has no effect.
    pub fn propose(&mut self, tier: RentalTier, proposed_by: Role) -> Result<bool, LaneError> {
        self.require_active()?;

        if self.selection_confirmed {
            return Ok(false);
        }

        self.proposed_tier = Some(tier);
        self.proposed_by = Some(proposed_by);
        self.touch();
        Ok(true)
    }

    /// First wins: the first confirmer locks whatever tier is proposed at
    /// that moment. A later confirm (from either side) is a no-op that
    /// returns the existing lock.
    pub fn confirm(&mut self, confirmed_by: Role, now: DateTime<Utc>) -> Result<SelectionLock, LaneError> {
        self.require_active()?;

        if self.selection_confirmed {
            // Idempotent replay; the caller cannot override the other
            // party's lock.
            return Ok(self.lock().expect("confirmed session always has a lock"));
        }

        let tier = self
            .proposed_tier
            .ok_or_else(|| LaneError::NothingProposed(self.lane.clone()))?;

        self.selection_confirmed = true;
        self.confirmed_tier = Some(tier);
        self.confirmed_by = Some(confirmed_by);
        self.locked_at = Some(now);
        self.touch();

        Ok(SelectionLock {
            tier,
            confirmed_by,
            locked_at: now,
        })
    }

    /// The non-confirming party records that it has seen the locked
    /// selection. Lock state is untouched.
    pub fn acknowledge(&mut self, acknowledged_by: Role) -> Result<(), LaneError> {
        self.require_active()?;

        if !self.selection_confirmed {
            return Err(LaneError::NothingConfirmed(self.lane.clone()));
        }

        self.acknowledged_by = Some(acknowledged_by);
        self.touch();
        Ok(())
    }

    /// Membership intent is independent of the selection flow. Setting
    /// `MembershipIntent::None` persists as a true clear.
    pub fn set_membership_intent(&mut self, intent: MembershipIntent) -> Result<(), LaneError> {
        self.require_active()?;
        self.membership_intent = Some(intent);
        self.touch();
        Ok(())
    }

    /// Customer-facing acknowledgement of the completion banner. Records a
    /// timestamp only; it must never flip the session to COMPLETED.
    pub fn kiosk_ack(&mut self, now: DateTime<Utc>) -> Result<(), LaneError> {
        self.require_active()?;
        self.kiosk_acked_at = Some(now);
        self.touch();
        Ok(())
    }

    /// Explicit staff reset: the only transition to COMPLETED. Clears the
    /// customer binding so the lane is ready for the next transaction.
    pub fn reset(&mut self) -> Result<(), LaneError> {
        self.require_active()?;
        self.status = SessionStatus::Completed;
        self.customer_id = None;
        self.touch();
        Ok(())
    }

    pub fn bind_customer(&mut self, customer_id: Uuid) -> Result<(), LaneError> {
        self.require_active()?;
        self.customer_id = Some(customer_id);
        self.membership_scanned = true;
        self.touch();
        Ok(())
    }

    pub fn lock(&self) -> Option<SelectionLock> {
        match (self.confirmed_tier, self.confirmed_by, self.locked_at) {
            (Some(tier), Some(confirmed_by), Some(locked_at)) if self.selection_confirmed => {
                Some(SelectionLock {
                    tier,
                    confirmed_by,
                    locked_at,
                })
            }
            _ => None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaneError {
    #[error("Lane session is not active: {0}")]
    NotActive(String),

    #[error("No rental type proposed on lane {0}")]
    NothingProposed(String),

    #[error("No confirmed selection to acknowledge on lane {0}")]
    NothingConfirmed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_confirm_wins() {
        let mut session = LaneSession::new("lane-1");

        session.propose(RentalTier::Standard, Role::Customer).unwrap();
        session.propose(RentalTier::Double, Role::Employee).unwrap();

        // Employee confirms first; the Double proposal is locked.
        let lock = session.confirm(Role::Employee, Utc::now()).unwrap();
        assert_eq!(lock.tier, RentalTier::Double);
        assert_eq!(lock.confirmed_by, Role::Employee);

        // Customer's later confirm is an idempotent no-op on the same lock.
        let replay = session.confirm(Role::Customer, Utc::now()).unwrap();
        assert_eq!(replay.tier, RentalTier::Double);
        assert_eq!(replay.confirmed_by, Role::Employee);
        assert_eq!(replay.locked_at, lock.locked_at);
    }

    #[test]
    fn test_propose_after_lock_has_no_effect() {
        let mut session = LaneSession::new("lane-1");
        session.propose(RentalTier::Standard, Role::Customer).unwrap();
        session.confirm(Role::Customer, Utc::now()).unwrap();

        let changed = session.propose(RentalTier::Special, Role::Customer).unwrap();
        assert!(!changed);
        assert_eq!(session.confirmed_tier, Some(RentalTier::Standard));
        // The proposal snapshot at lock time is what stays.
        assert_eq!(session.proposed_tier, Some(RentalTier::Standard));
    }

    #[test]
    fn test_confirm_without_proposal_fails() {
        let mut session = LaneSession::new("lane-1");
        assert!(matches!(
            session.confirm(Role::Employee, Utc::now()),
            Err(LaneError::NothingProposed(_))
        ));
    }

    #[test]
    fn test_acknowledge_preserves_lock() {
        let mut session = LaneSession::new("lane-1");
        session.propose(RentalTier::Locker, Role::Customer).unwrap();
        let lock = session.confirm(Role::Customer, Utc::now()).unwrap();

        session.acknowledge(Role::Employee).unwrap();
        assert_eq!(session.acknowledged_by, Some(Role::Employee));
        assert_eq!(session.lock().unwrap(), lock);
    }

    #[test]
    fn test_kiosk_ack_does_not_end_session() {
        let mut session = LaneSession::new("lane-1");
        let customer = Uuid::new_v4();
        session.bind_customer(customer).unwrap();

        session.kiosk_ack(Utc::now()).unwrap();

        assert_ne!(session.status, SessionStatus::Completed);
        assert_eq!(session.customer_id, Some(customer));
        assert!(session.kiosk_acked_at.is_some());
    }

    #[test]
    fn test_reset_completes_and_clears_binding() {
        let mut session = LaneSession::new("lane-1");
        session.bind_customer(Uuid::new_v4()).unwrap();

        session.reset().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.customer_id, None);

        // Everything after reset fails with NOT-ACTIVE.
        assert!(matches!(
            session.propose(RentalTier::Standard, Role::Customer),
            Err(LaneError::NotActive(_))
        ));
        assert!(matches!(
            session.kiosk_ack(Utc::now()),
            Err(LaneError::NotActive(_))
        ));
    }

    #[test]
    fn test_membership_intent_clear_is_persisted() {
        let mut session = LaneSession::new("lane-1");
        assert_eq!(session.membership_intent, None);

        session.set_membership_intent(MembershipIntent::Purchase).unwrap();
        assert_eq!(session.membership_intent, Some(MembershipIntent::Purchase));

        // Clearing must be distinguishable from "never decided".
        session.set_membership_intent(MembershipIntent::None).unwrap();
        assert_eq!(session.membership_intent, Some(MembershipIntent::None));
    }
}
