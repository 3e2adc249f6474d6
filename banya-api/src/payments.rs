use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use banya_core::payment::{PaymentAdapter, PaymentIntent, PaymentStatus};
use banya_core::{CoreError, CoreResult};
use banya_lane::{MembershipIntent, PaymentState};
use banya_shared::DomainEvent;

use crate::{error::AppError, state::AppState};

// ============================================================================
// Terminal adapter
// ============================================================================

/// Card-terminal adapter for a single-site install. Intents live in memory;
/// the terminal bridge reports outcomes through the webhook.
pub struct TerminalPaymentAdapter {
    intents: Arc<RwLock<HashMap<String, PaymentIntent>>>,
}

impl TerminalPaymentAdapter {
    pub fn new() -> Self {
        Self {
            intents: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for TerminalPaymentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentAdapter for TerminalPaymentAdapter {
    async fn create_intent(
        &self,
        lane_session_id: Uuid,
        amount: i32,
        currency: &str,
    ) -> CoreResult<PaymentIntent> {
        if amount <= 0 {
            return Err(CoreError::Validation(format!(
                "Payment amount must be positive, got {}",
                amount
            )));
        }

        let intent = PaymentIntent {
            id: format!("pi_{}", Uuid::new_v4().simple()),
            lane_session_id,
            amount,
            currency: currency.to_string(),
            status: PaymentStatus::RequiresPaymentMethod,
            reference: None,
            client_secret: Some(format!("secret_{}", Uuid::new_v4().simple())),
            created_at: Utc::now(),
        };

        self.intents
            .write()
            .await
            .insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }

    async fn get_intent(&self, intent_id: &str) -> CoreResult<PaymentIntent> {
        self.intents
            .read()
            .await
            .get(intent_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("Payment intent {} not found", intent_id)))
    }

    async fn capture_payment(&self, intent_id: &str) -> CoreResult<PaymentIntent> {
        let mut intents = self.intents.write().await;
        let intent = intents
            .get_mut(intent_id)
            .ok_or_else(|| CoreError::NotFound(format!("Payment intent {} not found", intent_id)))?;
        intent.status = PaymentStatus::Succeeded;
        Ok(intent.clone())
    }
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/intents", post(create_intent))
        .route("/v1/payments/intents/{id}", get(get_intent))
}

/// Webhook is called by the terminal bridge, not a device at the counter,
/// so it sits outside the device-auth stack.
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/v1/payments/webhook", post(webhook))
}

#[derive(Debug, Deserialize)]
struct CreateIntentRequest {
    lane_session_id: Uuid,
    amount_cents: i32,
    #[serde(default = "default_currency")]
    currency: String,
}

fn default_currency() -> String {
    "usd".to_string()
}

async fn create_intent(
    State(state): State<AppState>,
    Json(body): Json<CreateIntentRequest>,
) -> Result<Json<PaymentIntent>, AppError> {
    // 1. Create the intent with the provider
    let intent = state
        .payments
        .create_intent(body.lane_session_id, body.amount_cents, &body.currency)
        .await?;

    // 2. Park the session in PENDING until the terminal reports back
    let session = state
        .lane_repo
        .set_payment(
            body.lane_session_id,
            Some(intent.id.clone()),
            PaymentState::Pending,
        )
        .await?;

    state.broadcaster.publish(DomainEvent::RegisterSessionUpdated {
        lane: session.lane.clone(),
        session_id: session.id,
    });
    Ok(Json(intent))
}

async fn get_intent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PaymentIntent>, AppError> {
    let intent = state.payments.get_intent(&id).await?;
    Ok(Json(intent))
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    intent_id: String,
    status: String,
}

async fn webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    // 1. Only settlement events change anything
    if payload.status != "succeeded" {
        tracing::info!(
            "Ignoring payment webhook for {} with status {}",
            payload.intent_id,
            payload.status
        );
        return Ok(Json(serde_json::json!({"received": true})));
    }

    // 2. Capture and mark the session paid
    let intent = state.payments.capture_payment(&payload.intent_id).await?;
    let session = state
        .lane_repo
        .set_payment(
            intent.lane_session_id,
            Some(intent.id.clone()),
            PaymentState::Paid,
        )
        .await?;

    // 3. A paid membership intent takes effect now
    if let (Some(customer_id), Some(intent)) = (session.customer_id, session.membership_intent) {
        if intent != MembershipIntent::None {
            let valid_until =
                Utc::now() + chrono::Duration::days(state.business_rules.membership_valid_days);
            if let Err(e) = state
                .customer_repo
                .apply_membership(customer_id, intent, valid_until)
                .await
            {
                tracing::warn!("Membership update failed for customer {}: {}", customer_id, e);
            }
        }
    }

    state.broadcaster.publish(DomainEvent::SessionUpdated {
        lane: session.lane.clone(),
        session_id: session.id,
    });
    state.broadcaster.publish(DomainEvent::RegisterSessionUpdated {
        lane: session.lane.clone(),
        session_id: session.id,
    });

    Ok(Json(serde_json::json!({"received": true})))
}
