//! Work queues backed by PostgreSQL.

use async_trait::async_trait;
use preview_core::{ClaimedItem, QueueFactory, QueueName, ResourceId, WorkItem, WorkQueue};
use sqlx::PgPool;
use sqlx::types::Json;
use std::sync::Arc;
use std::time::Duration;

use crate::DbResult;

/// How long a claimed item stays invisible before another worker may take it.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(3600);

#[derive(Debug, sqlx::FromRow)]
struct ClaimedRow {
    id: uuid::Uuid,
    payload: Json<WorkItem>,
}

/// One named queue stored in `preview_work_queue`.
pub struct PgWorkQueue {
    pool: PgPool,
    name: String,
    lease: Duration,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, name: QueueName) -> Self {
        Self {
            pool,
            name: name.to_string(),
            lease: DEFAULT_CLAIM_LEASE,
        }
    }

    async fn declare(&self) -> DbResult<()> {
        sqlx::query("INSERT INTO preview_queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(&self.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn drop_all(&self) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM preview_work_queue WHERE queue_name = $1")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM preview_queues WHERE name = $1")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn push(&self, item: &WorkItem) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO preview_work_queue (id, queue_name, payload, status, available_at, created_at)
            VALUES ($1, $2, $3, 'pending', NOW(), NOW())
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(&self.name)
        .bind(Json(item))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claim the oldest available item.
    /// Uses SKIP LOCKED so several workers can drain the same queue. Items
    /// claimed longer than the lease ago count as available again.
    async fn claim(&self) -> DbResult<Option<ClaimedItem>> {
        let row = sqlx::query_as::<_, ClaimedRow>(
            r#"
            UPDATE preview_work_queue
            SET status = 'claimed', claimed_at = NOW()
            WHERE id = (
                SELECT id FROM preview_work_queue
                WHERE queue_name = $1
                  AND (
                    (status = 'pending' AND available_at <= NOW())
                    OR (status = 'claimed' AND claimed_at <= NOW() - make_interval(secs => $2))
                  )
                ORDER BY seq ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload
            "#,
        )
        .bind(&self.name)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ClaimedItem {
            id: ResourceId::from_uuid(row.id),
            item: row.payload.0,
        }))
    }

    async fn remove(&self, claimed: &ClaimedItem) -> DbResult<()> {
        sqlx::query("DELETE FROM preview_work_queue WHERE id = $1")
            .bind(claimed.id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unclaim(&self, claimed: &ClaimedItem, delay: Duration) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE preview_work_queue
            SET status = 'pending', claimed_at = NULL,
                available_at = NOW() + make_interval(secs => $2)
            WHERE id = $1
            "#,
        )
        .bind(claimed.id.as_uuid())
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn len(&self) -> DbResult<u64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM preview_work_queue WHERE queue_name = $1")
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count.0).unwrap_or_default())
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn create_queue(&self) -> preview_core::Result<()> {
        Ok(self.declare().await?)
    }

    async fn delete_queue(&self) -> preview_core::Result<()> {
        Ok(self.drop_all().await?)
    }

    async fn enqueue(&self, item: WorkItem) -> preview_core::Result<()> {
        Ok(self.push(&item).await?)
    }

    async fn claim_one(&self) -> preview_core::Result<Option<ClaimedItem>> {
        Ok(self.claim().await?)
    }

    async fn delete_claimed(&self, claimed: &ClaimedItem) -> preview_core::Result<()> {
        Ok(self.remove(claimed).await?)
    }

    async fn release(&self, claimed: &ClaimedItem) -> preview_core::Result<()> {
        Ok(self.unclaim(claimed, Duration::ZERO).await?)
    }

    fn supports_delay(&self) -> bool {
        true
    }

    async fn delay(&self, claimed: &ClaimedItem, delay: Duration) -> preview_core::Result<()> {
        Ok(self.unclaim(claimed, delay).await?)
    }

    async fn count(&self) -> preview_core::Result<u64> {
        Ok(self.len().await?)
    }
}

/// Hands out [`PgWorkQueue`] handles sharing one pool.
#[derive(Clone)]
pub struct PgQueueFactory {
    pool: PgPool,
}

impl PgQueueFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl QueueFactory for PgQueueFactory {
    fn get(&self, name: QueueName) -> Arc<dyn WorkQueue> {
        Arc::new(PgWorkQueue::new(self.pool.clone(), name))
    }
}
