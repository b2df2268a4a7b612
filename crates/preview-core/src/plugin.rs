//! Registry mapping plugin identifiers to factories.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::{DeployPlugin, Error, GeneratePlugin, PluginConfig, Result};

/// Settings passed to a plugin factory.
pub type PluginSettings = BTreeMap<String, String>;

pub type GenerateFactory =
    Arc<dyn Fn(&PluginSettings) -> Result<Arc<dyn GeneratePlugin>> + Send + Sync>;
pub type DeployFactory =
    Arc<dyn Fn(&PluginSettings) -> Result<Arc<dyn DeployPlugin>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct PluginRegistry {
    generate: HashMap<String, GenerateFactory>,
    deploy: HashMap<String, DeployFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_generate<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&PluginSettings) -> Result<Arc<dyn GeneratePlugin>> + Send + Sync + 'static,
    {
        self.generate.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn register_deploy<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&PluginSettings) -> Result<Arc<dyn DeployPlugin>> + Send + Sync + 'static,
    {
        self.deploy.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn create_generate(&self, config: &PluginConfig) -> Result<Arc<dyn GeneratePlugin>> {
        let factory = self.generate.get(&config.plugin).ok_or_else(|| {
            Error::NotFound(format!("generate plugin '{}'", config.plugin))
        })?;
        factory(&config.settings)
    }

    pub fn create_deploy(&self, config: &PluginConfig) -> Result<Arc<dyn DeployPlugin>> {
        let factory = self
            .deploy
            .get(&config.plugin)
            .ok_or_else(|| Error::NotFound(format!("deploy plugin '{}'", config.plugin)))?;
        factory(&config.settings)
    }

    pub fn has_generate(&self, id: &str) -> bool {
        self.generate.contains_key(id)
    }

    pub fn has_deploy(&self, id: &str) -> bool {
        self.deploy.contains_key(id)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut generate: Vec<_> = self.generate.keys().collect();
        let mut deploy: Vec<_> = self.deploy.keys().collect();
        generate.sort();
        deploy.sort();
        f.debug_struct("PluginRegistry")
            .field("generate", &generate)
            .field("deploy", &deploy)
            .finish()
    }
}
