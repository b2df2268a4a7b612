//! Variable interpolation for plugin settings.
//!
//! Supports variables like:
//! - `${build.id}` - Sequential build id
//! - `${build.uuid}` - Build UUID
//! - `${build.label}` - Build label
//! - `${entity.type}` - Entity type of the item being generated
//! - `${entity.id}` - Entity id of the item being generated
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)

use preview_core::{Build, EntityRef};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub build: BuildContext,
    pub entity: EntityContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by the caller
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub id: String,
    pub uuid: String,
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct EntityContext {
    pub entity_type: String,
    pub id: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with the build variables and the process environment.
    pub fn for_build(build: &Build) -> Self {
        let mut ctx = VariableContextBuilder::new().with_build(build).build();
        ctx.populate_env();
        ctx
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Set the entity variables.
    pub fn set_entity(&mut self, entity: &EntityRef) {
        self.entity.entity_type = entity.entity_type.clone();
        self.entity.id = entity.id.clone();
    }

    /// Add a custom variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["build", "id"] => Some(self.build.id.clone()),
            ["build", "uuid"] => Some(self.build.uuid.clone()),
            ["build", "label"] => Some(self.build.label.clone()),

            ["entity", "type"] => Some(self.entity.entity_type.clone()),
            ["entity", "id"] => Some(self.entity.id.clone()),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),

            // Single-part names check custom variables
            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate every value of a settings map.
    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_build(mut self, build: &Build) -> Self {
        self.ctx.build.id = build.id.to_string();
        self.ctx.build.uuid = build.uuid.to_string();
        self.ctx.build.label = build.label.clone();
        self
    }

    pub fn with_entity(mut self, entity: &EntityRef) -> Self {
        self.ctx.set_entity(entity);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
