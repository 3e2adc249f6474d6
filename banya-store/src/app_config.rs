use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}

/// House rules that staff may retune without a redeploy; the
/// `business_rules` table overrides these file defaults at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub claim_expiry_minutes: i64,
    pub waitlist_offer_ttl_minutes: i64,
    pub membership_purchase_cents: i32,
    pub membership_renewal_cents: i32,
    pub membership_valid_days: i64,
    pub final_extension_fee_cents: i32,
    #[serde(default = "default_checklist")]
    pub checkout_checklist: Vec<String>,
}

fn default_checklist() -> Vec<String> {
    vec!["key".into(), "towel".into(), "robe".into()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of BANYA)
            // Eg.. `BANYA__SERVER__PORT=8080` would set the server port
            .add_source(config::Environment::with_prefix("BANYA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
