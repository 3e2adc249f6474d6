use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    RequiresPaymentMethod,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String, // Provider's ID (e.g., pi_123)
    pub lane_session_id: Uuid,
    pub amount: i32,
    pub currency: String,
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub client_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Create a payment intent with the provider for the lane's quote total
    async fn create_intent(
        &self,
        lane_session_id: Uuid,
        amount: i32,
        currency: &str,
    ) -> CoreResult<PaymentIntent>;

    /// Retrieve intent status
    async fn get_intent(&self, intent_id: &str) -> CoreResult<PaymentIntent>;

    /// Capture a previously authorized payment
    async fn capture_payment(&self, intent_id: &str) -> CoreResult<PaymentIntent>;
}
