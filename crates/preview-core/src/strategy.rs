//! Strategies pair a generate plugin with a deploy plugin.

use serde::{Deserialize, Serialize};

use crate::PluginSettings;

/// Plugin identifier plus its settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub plugin: String,
    #[serde(default)]
    pub settings: PluginSettings,
}

impl PluginConfig {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            settings: PluginSettings::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

/// A named generate/deploy pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    /// Immutable identifier referenced by builds.
    pub id: String,
    pub label: String,
    pub generate: PluginConfig,
    pub deploy: PluginConfig,
}
