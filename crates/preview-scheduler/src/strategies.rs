//! Strategies resolved into plugin instances.

use preview_config::SiteConfig;
use preview_core::{DeployPlugin, GeneratePlugin, PluginRegistry, Strategy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A strategy with its plugins instantiated.
///
/// A plugin slot is empty when its id is unknown or its settings were
/// rejected; work needing it soft-fails.
pub struct ResolvedStrategy {
    pub strategy: Strategy,
    pub generate: Option<Arc<dyn GeneratePlugin>>,
    pub deploy: Option<Arc<dyn DeployPlugin>>,
}

impl ResolvedStrategy {
    pub fn label(&self) -> &str {
        &self.strategy.label
    }
}

#[derive(Clone, Default)]
pub struct StrategyCatalog {
    strategies: HashMap<String, Arc<ResolvedStrategy>>,
}

impl StrategyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every configured strategy through `registry`.
    pub fn from_config(config: &SiteConfig, registry: &PluginRegistry) -> Self {
        let mut catalog = Self::new();
        for strategy in &config.strategies {
            let generate = match registry.create_generate(&strategy.generate) {
                Ok(plugin) => Some(plugin),
                Err(e) => {
                    warn!(strategy = %strategy.id, plugin = %strategy.generate.plugin, error = %e, "Generate plugin unavailable");
                    None
                }
            };
            let deploy = match registry.create_deploy(&strategy.deploy) {
                Ok(plugin) => Some(plugin),
                Err(e) => {
                    warn!(strategy = %strategy.id, plugin = %strategy.deploy.plugin, error = %e, "Deploy plugin unavailable");
                    None
                }
            };
            catalog.insert(strategy.clone(), generate, deploy);
        }
        catalog
    }

    pub fn insert(
        &mut self,
        strategy: Strategy,
        generate: Option<Arc<dyn GeneratePlugin>>,
        deploy: Option<Arc<dyn DeployPlugin>>,
    ) -> &mut Self {
        self.strategies.insert(
            strategy.id.clone(),
            Arc::new(ResolvedStrategy {
                strategy,
                generate,
                deploy,
            }),
        );
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<ResolvedStrategy>> {
        self.strategies.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strategies.contains_key(id)
    }

    /// Strategy ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for StrategyCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCatalog")
            .field("strategies", &self.ids())
            .finish()
    }
}
