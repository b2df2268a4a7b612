//! Wiring shared by the commands.

use anyhow::{Context, Result};
use preview_config::{SiteConfig, load_site_config};
use preview_core::PluginRegistry;
use preview_db::{PgBuildRepo, PgQueueFactory, PgStateStore, create_pool};
use preview_generator::{LocalArtifactStore, RelevanceGraph, UsageGraph};
use preview_scheduler::{BuildLifecycle, PipelineOrchestrator, StrategyCatalog};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything a command needs.
pub struct App {
    pub config: SiteConfig,
    pub relevance: Arc<RelevanceGraph>,
    pub lifecycle: BuildLifecycle,
    pub orchestrator: PipelineOrchestrator,
}

impl App {
    pub async fn connect(config_path: &Path, database_url: Option<&str>) -> Result<Self> {
        let config = load_site_config(config_path)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
        let database_url = database_url.context("DATABASE_URL is not set")?;

        info!("Connecting to database...");
        let pool = create_pool(database_url)
            .await
            .context("Failed to connect to database")?;
        info!("Database connected");

        let relevance = Arc::new(relevance_graph(&config)?);
        let registry = registry(&config, relevance.clone());
        let strategies = Arc::new(StrategyCatalog::from_config(&config, &registry));

        let lifecycle = BuildLifecycle::new(
            Arc::new(PgBuildRepo::new(pool.clone())),
            Arc::new(PgStateStore::new(pool.clone())),
            strategies,
        );
        let orchestrator = PipelineOrchestrator::new(
            lifecycle.clone(),
            Arc::new(PgQueueFactory::new(pool.clone())),
            Arc::new(LocalArtifactStore::new()),
        )
        .with_cleanup_batch_size(config.cleanup_batch_size);

        Ok(Self {
            config,
            relevance,
            lifecycle,
            orchestrator,
        })
    }
}

/// Relevance graph over the configured usage graph, empty when none is set.
pub fn relevance_graph(config: &SiteConfig) -> Result<RelevanceGraph> {
    let graph = match &config.usage_graph {
        Some(path) => UsageGraph::load(path)
            .with_context(|| format!("Failed to load usage graph: {}", path.display()))?,
        None => UsageGraph::new(),
    };
    Ok(RelevanceGraph::from_usage_graph(graph).with_max_depth(config.relevance_max_depth))
}

/// Registry of every plugin this binary ships.
pub fn registry(config: &SiteConfig, relevance: Arc<RelevanceGraph>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    preview_generator::register_plugins(&mut registry, config.artifacts_root.clone(), relevance);
    preview_deployer::register_plugins(&mut registry);
    registry
}
