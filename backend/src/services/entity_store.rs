//! Row-level access to application entities for the JSON export path.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{AppError, Result};

/// Reads and rewrites whole entity collections.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// All rows of `entity` as JSON objects.
    async fn export_entity(&self, entity: &str) -> Result<Vec<serde_json::Value>>;

    /// Replace the contents of every listed entity with the given rows, in
    /// order, as one atomic unit.
    async fn import_entities(&self, data: &[(String, Vec<serde_json::Value>)]) -> Result<()>;
}

/// Quote a table name for interpolation into SQL.
pub(crate) fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::Validation(format!(
            "Invalid entity name: {}",
            name
        )));
    }
    Ok(format!("\"{}\"", name))
}

/// Postgres-backed entity store.
pub struct PgEntityStore {
    db: PgPool,
}

impl PgEntityStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn export_entity(&self, entity: &str) -> Result<Vec<serde_json::Value>> {
        let query = format!("SELECT row_to_json(t) FROM {} t", quote_ident(entity)?);
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&query)
            .fetch_all(&self.db)
            .await
            .map_err(AppError::Database)?;

        Ok(rows)
    }

    async fn import_entities(&self, data: &[(String, Vec<serde_json::Value>)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let tables = data
            .iter()
            .map(|(entity, _)| quote_ident(entity))
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self.db.begin().await.map_err(AppError::Database)?;

        sqlx::query(&format!("TRUNCATE {} CASCADE", tables.join(", ")))
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

        for ((entity, rows), table) in data.iter().zip(&tables) {
            if rows.is_empty() {
                continue;
            }
            let inserted = sqlx::query(&format!(
                "INSERT INTO {table} SELECT * FROM jsonb_populate_recordset(NULL::{table}, $1)"
            ))
            .bind(serde_json::Value::Array(rows.clone()))
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

            tracing::debug!(entity = %entity, rows = inserted.rows_affected(), "Restored entity rows");
        }

        tx.commit().await.map_err(AppError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_accepts_plain_names() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("user_groups").unwrap(), "\"user_groups\"");
    }

    #[test]
    fn test_quote_ident_rejects_injection() {
        assert!(quote_ident("").is_err());
        assert!(quote_ident("users\"; DROP TABLE users; --").is_err());
        assert!(quote_ident("public.users").is_err());
    }
}
