//! Database layer for preview site builds.
//!
//! Provides the build repository trait, PostgreSQL implementations of builds,
//! work queues and shared state, plus in-memory equivalents.

pub mod error;
pub mod memory;
pub mod queue;
pub mod repo;
pub mod state;

pub use error::{DbError, DbResult};
pub use memory::{MemoryBuildRepo, MemoryQueueFactory, MemoryStateStore, MemoryWorkQueue};
pub use queue::{DEFAULT_CLAIM_LEASE, PgQueueFactory, PgWorkQueue};
pub use repo::*;
pub use state::PgStateStore;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
