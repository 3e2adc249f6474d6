use std::net::SocketAddr;
use std::sync::Arc;

use banya_api::{app, broadcast::Broadcaster, payments::TerminalPaymentAdapter, state::{AppState, AuthConfig}};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banya_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = banya_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Banya API on port {}", config.server.port);

    // Database
    let db = banya_store::DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    // File defaults overlaid with table overrides.
    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .expect("Failed to load business rules");

    // Redis
    let redis = banya_store::RedisClient::new(&config.redis.url)
        .await
        .expect("Failed to connect to Redis");

    let pool = db.pool.clone();
    let app_state = AppState {
        db: Arc::new(db),
        redis: Arc::new(redis),
        lane_repo: Arc::new(banya_store::PgLaneSessionRepository::new(pool.clone())),
        visit_repo: Arc::new(banya_store::PgVisitRepository::new(
            pool.clone(),
            rules.clone(),
        )),
        checkout_repo: Arc::new(banya_store::PgCheckoutRepository::new(
            pool.clone(),
            rules.clone(),
        )),
        waitlist_repo: Arc::new(banya_store::PgWaitlistRepository::new(
            pool.clone(),
            rules.clone(),
        )),
        resource_repo: Arc::new(banya_store::PgResourceRepository::new(pool.clone())),
        customer_repo: Arc::new(banya_store::PgCustomerRepository::new(pool)),
        payments: Arc::new(TerminalPaymentAdapter::new()),
        broadcaster: Broadcaster::new(),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        business_rules: rules,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
