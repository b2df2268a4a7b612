//! Build repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use preview_core::{ArtifactRef, Build, BuildId, EntityRef, NewBuild, ResourceId};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Database row for preview builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BuildRecord {
    pub id: i64,
    pub uuid: Uuid,
    pub label: String,
    pub status: String,
    pub strategy: String,
    pub contents: Json<Vec<EntityRef>>,
    pub artifacts: Json<Vec<ArtifactRef>>,
    pub log: Vec<String>,
    pub processed_paths: Vec<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

impl TryFrom<BuildRecord> for Build {
    type Error = DbError;

    fn try_from(row: BuildRecord) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|_| DbError::InvalidData(format!("build {} status '{}'", row.id, row.status)))?;

        Ok(Build {
            id: BuildId::new(row.id),
            uuid: ResourceId::from_uuid(row.uuid),
            label: row.label,
            status,
            strategy: row.strategy,
            contents: row.contents.0,
            artifacts: row.artifacts.0,
            log: row.log,
            processed_paths: row.processed_paths,
            expiry_date: row.expiry_date,
            deployed_at: row.deployed_at,
            created_at: row.created_at,
            changed_at: row.changed_at,
        })
    }
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    async fn create(&self, input: NewBuild) -> DbResult<Build>;
    async fn get(&self, id: BuildId) -> DbResult<Build>;
    async fn get_by_uuid(&self, uuid: ResourceId) -> DbResult<Build>;
    /// Persist every mutable field and bump `changed_at`.
    async fn save(&self, build: &mut Build) -> DbResult<()>;
    async fn delete(&self, id: BuildId) -> DbResult<()>;
    async fn list(&self) -> DbResult<Vec<Build>>;
    /// Builds past their expiry date that are not decommissioned yet.
    async fn list_expired(&self, now: DateTime<Utc>) -> DbResult<Vec<Build>>;
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn create(&self, input: NewBuild) -> DbResult<Build> {
        let record = sqlx::query_as::<_, BuildRecord>(
            r#"
            INSERT INTO preview_builds (uuid, label, status, strategy, contents, expiry_date, created_at, changed_at)
            VALUES ($1, $2, 'pending', $3, $4, $5, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.label)
        .bind(&input.strategy)
        .bind(Json(&input.contents))
        .bind(input.expiry_date)
        .fetch_one(&self.pool)
        .await?;
        record.try_into()
    }

    async fn get(&self, id: BuildId) -> DbResult<Build> {
        let record =
            sqlx::query_as::<_, BuildRecord>("SELECT * FROM preview_builds WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        record.try_into()
    }

    async fn get_by_uuid(&self, uuid: ResourceId) -> DbResult<Build> {
        let record =
            sqlx::query_as::<_, BuildRecord>("SELECT * FROM preview_builds WHERE uuid = $1")
                .bind(uuid.as_uuid())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("build {}", uuid)))?;
        record.try_into()
    }

    async fn save(&self, build: &mut Build) -> DbResult<()> {
        let changed_at: (DateTime<Utc>,) = sqlx::query_as(
            r#"
            UPDATE preview_builds
            SET label = $2, status = $3, contents = $4, artifacts = $5, log = $6,
                processed_paths = $7, expiry_date = $8, deployed_at = $9, changed_at = NOW()
            WHERE id = $1
            RETURNING changed_at
            "#,
        )
        .bind(build.id.get())
        .bind(&build.label)
        .bind(build.status.as_str())
        .bind(Json(&build.contents))
        .bind(Json(&build.artifacts))
        .bind(&build.log)
        .bind(&build.processed_paths)
        .bind(build.expiry_date)
        .bind(build.deployed_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("build {}", build.id)))?;
        build.changed_at = changed_at.0;
        Ok(())
    }

    async fn delete(&self, id: BuildId) -> DbResult<()> {
        sqlx::query("DELETE FROM preview_builds WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> DbResult<Vec<Build>> {
        let records = sqlx::query_as::<_, BuildRecord>("SELECT * FROM preview_builds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        records.into_iter().map(Build::try_from).collect()
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> DbResult<Vec<Build>> {
        let records = sqlx::query_as::<_, BuildRecord>(
            r#"
            SELECT * FROM preview_builds
            WHERE expiry_date IS NOT NULL AND expiry_date <= $1 AND status <> 'decommissioned'
            ORDER BY expiry_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(Build::try_from).collect()
    }
}
