pub mod app_config;
pub mod audit;
pub mod checkout_repo;
pub mod customer_repo;
pub mod database;
pub mod lane_repo;
pub mod redis_repo;
pub mod resource_repo;
pub mod visit_repo;
pub mod waitlist_repo;

pub use checkout_repo::PgCheckoutRepository;
pub use customer_repo::PgCustomerRepository;
pub use database::DbClient;
pub use lane_repo::PgLaneSessionRepository;
pub use redis_repo::RedisClient;
pub use resource_repo::PgResourceRepository;
pub use visit_repo::PgVisitRepository;
pub use waitlist_repo::PgWaitlistRepository;
