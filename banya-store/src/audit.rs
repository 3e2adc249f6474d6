use serde_json::Value;
use sqlx::Postgres;
use uuid::Uuid;

/// Append one audit row. Takes an executor so callers can write the row
/// inside the same transaction as the change it records.
pub async fn add_audit_change<'e, E>(
    executor: E,
    actor: &str,
    action: &str,
    entity: &str,
    entity_id: Option<Uuid>,
    before_state: Option<Value>,
    after_state: Option<Value>,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO audit_log (actor, action, entity, entity_id, before_state, after_state)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(actor)
    .bind(action)
    .bind(entity)
    .bind(entity_id)
    .bind(before_state)
    .bind(after_state)
    .execute(executor)
    .await?;

    Ok(())
}
