//! Site configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use preview_core::{PluginConfig, PluginSettings, Strategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_ARTIFACTS_ROOT: &str = "artifacts";
pub const DEFAULT_RELEVANCE_MAX_DEPTH: usize = 10;
pub const DEFAULT_CLEANUP_BATCH_SIZE: usize = 10;

/// Site-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Directory under which every build gets its own artifact directory.
    pub artifacts_root: PathBuf,
    /// Recursion cap for relevance checks.
    pub relevance_max_depth: usize,
    /// JSON file describing entity references and parents.
    pub usage_graph: Option<PathBuf>,
    /// Intermediate files deleted per `mark_finished` call.
    pub cleanup_batch_size: usize,
    pub strategies: Vec<Strategy>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            artifacts_root: PathBuf::from(DEFAULT_ARTIFACTS_ROOT),
            relevance_max_depth: DEFAULT_RELEVANCE_MAX_DEPTH,
            usage_graph: None,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
            strategies: Vec::new(),
        }
    }
}

impl SiteConfig {
    pub fn strategy(&self, id: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.id == id)
    }
}

/// Read and parse a site configuration file.
pub fn load_site_config(path: impl AsRef<Path>) -> ConfigResult<SiteConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_site_config(&text)
}

/// Parse a site configuration from KDL text.
pub fn parse_site_config(kdl: &str) -> ConfigResult<SiteConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut config = SiteConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "artifacts" => {
                let root = get_string_prop(node, "root")
                    .ok_or_else(|| ConfigError::MissingField("artifacts root".to_string()))?;
                config.artifacts_root = PathBuf::from(root);
            }
            "relevance" => {
                if let Some(depth) = get_positive_prop(node, "max-depth")? {
                    config.relevance_max_depth = depth;
                }
                if let Some(path) = get_string_prop(node, "usage-graph") {
                    config.usage_graph = Some(PathBuf::from(path));
                }
            }
            "cleanup" => {
                if let Some(size) = get_positive_prop(node, "batch-size")? {
                    config.cleanup_batch_size = size;
                }
            }
            "strategy" => {
                let strategy = parse_strategy(node)?;
                if !seen.insert(strategy.id.clone()) {
                    return Err(ConfigError::Duplicate(format!("strategy '{}'", strategy.id)));
                }
                config.strategies.push(strategy);
            }
            other => return Err(ConfigError::UnknownNode(other.to_string())),
        }
    }

    Ok(config)
}

fn parse_strategy(node: &KdlNode) -> ConfigResult<Strategy> {
    let id = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("strategy id".to_string()))?;
    let label = get_string_prop(node, "label").unwrap_or_else(|| id.clone());

    let mut generate = None;
    let mut deploy = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "generate" => generate = Some(parse_plugin(child, "generate", &id)?),
                "deploy" => deploy = Some(parse_plugin(child, "deploy", &id)?),
                other => {
                    return Err(ConfigError::UnknownNode(format!(
                        "{} in strategy '{}'",
                        other, id
                    )));
                }
            }
        }
    }

    let generate = generate.ok_or_else(|| {
        ConfigError::MissingField(format!("generate plugin for strategy '{}'", id))
    })?;
    let deploy = deploy
        .ok_or_else(|| ConfigError::MissingField(format!("deploy plugin for strategy '{}'", id)))?;

    Ok(Strategy {
        id,
        label,
        generate,
        deploy,
    })
}

fn parse_plugin(node: &KdlNode, kind: &str, strategy: &str) -> ConfigResult<PluginConfig> {
    let plugin = get_first_string_arg(node).ok_or_else(|| {
        ConfigError::MissingField(format!("{} plugin id for strategy '{}'", kind, strategy))
    })?;

    let mut settings = PluginSettings::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = get_first_string_arg(child).ok_or_else(|| ConfigError::InvalidValue {
                field: format!("{}.{}", plugin, key),
                message: "expected a string value".to_string(),
            })?;
            if settings.insert(key.clone(), value).is_some() {
                return Err(ConfigError::Duplicate(format!("{}.{}", plugin, key)));
            }
        }
    }

    Ok(PluginConfig { plugin, settings })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_positive_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<usize>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    let field = format!("{} {}", node.name().value(), name);
    let number = value.as_integer().ok_or_else(|| ConfigError::InvalidValue {
        field: field.clone(),
        message: "expected an integer".to_string(),
    })?;
    match usize::try_from(number) {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidValue {
            field,
            message: format!("expected a positive integer, got {}", number),
        }),
    }
}
