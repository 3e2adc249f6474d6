use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};
use std::time::Duration;
use tracing::info;
use serde_json::Value;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlay `business_rules` table rows on the file defaults.
    /// Row format: {"value": <number/string/array>}.
    pub async fn fetch_business_rules(
        &self,
        defaults: crate::app_config::BusinessRules,
    ) -> Result<crate::app_config::BusinessRules, sqlx::Error> {
        let rows = sqlx::query("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;

        for row in rows {
            let rule_key: String = row.get("rule_key");
            let rule_value: Value = row.get("rule_value");

            if let Some(v) = rule_value.get("value") {
                match rule_key.as_str() {
                    "claim_expiry_minutes" => {
                        if let Some(n) = v.as_i64() {
                            rules.claim_expiry_minutes = n;
                        }
                    }
                    "waitlist_offer_ttl_minutes" => {
                        if let Some(n) = v.as_i64() {
                            rules.waitlist_offer_ttl_minutes = n;
                        }
                    }
                    "membership_purchase_cents" => {
                        if let Some(n) = v.as_i64() {
                            rules.membership_purchase_cents = n as i32;
                        }
                    }
                    "membership_renewal_cents" => {
                        if let Some(n) = v.as_i64() {
                            rules.membership_renewal_cents = n as i32;
                        }
                    }
                    "membership_valid_days" => {
                        if let Some(n) = v.as_i64() {
                            rules.membership_valid_days = n;
                        }
                    }
                    "final_extension_fee_cents" => {
                        if let Some(n) = v.as_i64() {
                            rules.final_extension_fee_cents = n as i32;
                        }
                    }
                    "checkout_checklist" => {
                        if let Some(items) = v.as_array() {
                            rules.checkout_checklist = items
                                .iter()
                                .filter_map(|i| i.as_str().map(String::from))
                                .collect();
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(rules)
    }
}
