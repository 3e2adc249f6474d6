use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use banya_core::repository::CustomerRepository;
use banya_core::{CoreError, CoreResult};
use banya_lane::MembershipIntent;
use banya_visit::Customer;

pub(crate) const CUSTOMER_COLS: &str = "id, full_name, membership_number, membership_valid_until, \
     past_due_cents, banned_until, notes, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct CustomerRow {
    id: Uuid,
    full_name: String,
    membership_number: Option<String>,
    membership_valid_until: Option<DateTime<Utc>>,
    past_due_cents: i32,
    banned_until: Option<DateTime<Utc>>,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(r: CustomerRow) -> Self {
        Customer {
            id: r.id,
            full_name: r.full_name,
            membership_number: r.membership_number,
            membership_valid_until: r.membership_valid_until,
            past_due_cents: r.past_due_cents,
            banned_until: r.banned_until,
            notes: r.notes,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("Database error: {}", e))
}

pub struct PgCustomerRepository {
    pool: Pool<Postgres>,
}

impl PgCustomerRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRepository for PgCustomerRepository {
    async fn get(&self, id: Uuid) -> CoreResult<Customer> {
        let row: Option<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM customers WHERE id = $1",
            CUSTOMER_COLS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Customer::from)
            .ok_or_else(|| CoreError::NotFound(format!("Customer {} not found", id)))
    }

    async fn find_by_membership(&self, membership_number: &str) -> CoreResult<Option<Customer>> {
        let row: Option<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM customers WHERE membership_number = $1",
            CUSTOMER_COLS
        ))
        .bind(membership_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Customer::from))
    }

    async fn create(&self, full_name: &str) -> CoreResult<Customer> {
        let row: CustomerRow = sqlx::query_as(&format!(
            "INSERT INTO customers (full_name) VALUES ($1) RETURNING {}",
            CUSTOMER_COLS
        ))
        .bind(full_name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.into())
    }

    async fn apply_membership(
        &self,
        customer_id: Uuid,
        intent: MembershipIntent,
        valid_until: DateTime<Utc>,
    ) -> CoreResult<Customer> {
        let row: Option<CustomerRow> = match intent {
            MembershipIntent::Purchase => {
                let number = format!(
                    "M-{}",
                    &Uuid::new_v4().simple().to_string()[..8].to_uppercase()
                );
                sqlx::query_as(&format!(
                    "UPDATE customers
                     SET membership_number = COALESCE(membership_number, $2),
                         membership_valid_until = $3,
                         updated_at = NOW()
                     WHERE id = $1
                     RETURNING {}",
                    CUSTOMER_COLS
                ))
                .bind(customer_id)
                .bind(number)
                .bind(valid_until)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
            }
            MembershipIntent::Renew => {
                // A renewal never shortens an existing membership.
                sqlx::query_as(&format!(
                    "UPDATE customers
                     SET membership_valid_until = GREATEST(membership_valid_until, $2),
                         updated_at = NOW()
                     WHERE id = $1 AND membership_number IS NOT NULL
                     RETURNING {}",
                    CUSTOMER_COLS
                ))
                .bind(customer_id)
                .bind(valid_until)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
            }
            MembershipIntent::None => {
                return self.get(customer_id).await;
            }
        };

        row.map(Customer::from).ok_or_else(|| {
            CoreError::Validation(format!(
                "Customer {} has no membership to apply intent to",
                customer_id
            ))
        })
    }
}
