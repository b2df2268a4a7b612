//! CLI command implementations.

pub mod build;
pub mod builds;
pub mod lock;

use crate::state::{registry, relevance_graph};
use anyhow::{Context, Result};
use preview_config::load_site_config;
use preview_db::{create_pool, run_migrations};
use std::path::Path;
use std::sync::Arc;

pub async fn migrate(database_url: Option<&str>) -> Result<()> {
    let database_url = database_url.context("DATABASE_URL is not set")?;
    let pool = create_pool(database_url)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool).await.context("Failed to run migrations")?;
    println!("Migrations applied");
    Ok(())
}

/// Parse the configuration and instantiate every strategy's plugins.
pub fn validate(path: &Path) -> Result<()> {
    let config = match load_site_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let relevance = Arc::new(relevance_graph(&config)?);
    let registry = registry(&config, relevance);

    let mut errors = 0;
    for strategy in &config.strategies {
        if let Err(e) = registry.create_generate(&strategy.generate) {
            println!("✗ {}: generate: {}", strategy.id, e);
            errors += 1;
        }
        if let Err(e) = registry.create_deploy(&strategy.deploy) {
            println!("✗ {}: deploy: {}", strategy.id, e);
            errors += 1;
        }
    }

    if errors > 0 {
        std::process::exit(1);
    }
    println!(
        "Configuration is valid ({} strategies)",
        config.strategies.len()
    );
    Ok(())
}
