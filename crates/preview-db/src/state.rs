//! Key-value state backed by PostgreSQL.

use async_trait::async_trait;
use preview_core::StateStore;
use sqlx::PgPool;

use crate::DbResult;

pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, key: &str) -> DbResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM preview_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn upsert(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO preview_state (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM preview_state WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn get(&self, key: &str) -> preview_core::Result<Option<String>> {
        Ok(self.fetch(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> preview_core::Result<()> {
        Ok(self.upsert(key, value).await?)
    }

    async fn delete(&self, key: &str) -> preview_core::Result<()> {
        Ok(self.remove(key).await?)
    }
}
