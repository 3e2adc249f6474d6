use std::sync::Arc;

use banya_core::payment::PaymentAdapter;
use banya_core::repository::{
    CheckoutRepository, CustomerRepository, LaneSessionRepository, ResourceRepository,
    VisitRepository, WaitlistRepository,
};
use banya_store::app_config::BusinessRules;
use banya_store::{DbClient, RedisClient};

use crate::broadcast::Broadcaster;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbClient>,
    pub redis: Arc<RedisClient>,
    pub lane_repo: Arc<dyn LaneSessionRepository>,
    pub visit_repo: Arc<dyn VisitRepository>,
    pub checkout_repo: Arc<dyn CheckoutRepository>,
    pub waitlist_repo: Arc<dyn WaitlistRepository>,
    pub resource_repo: Arc<dyn ResourceRepository>,
    pub customer_repo: Arc<dyn CustomerRepository>,
    pub payments: Arc<dyn PaymentAdapter>,
    pub broadcaster: Broadcaster,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}
