//! Content entity references and the relationship seams used to decide
//! whether an entity belongs in a build.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// A (type, id) reference to a content entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

impl std::str::FromStr for EntityRef {
    type Err = Error;

    /// Parses `type:id`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((entity_type, id)) if !entity_type.is_empty() && !id.is_empty() => {
                Ok(Self::new(entity_type, id))
            }
            _ => Err(Error::InvalidInput(format!(
                "expected an entity reference of the form type:id, got '{}'",
                s
            ))),
        }
    }
}

/// Entities of one type that reference a given entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSource {
    pub entity_type: String,
    pub ids: Vec<String>,
}

/// Resolves the parent of an entity (e.g. the page embedding a paragraph).
#[async_trait]
pub trait ParentResolver: Send + Sync {
    async fn parent_of(&self, entity: &EntityRef) -> Result<Option<EntityRef>>;
}

/// Parent resolver for entity types that have no parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoParent;

#[async_trait]
impl ParentResolver for NoParent {
    async fn parent_of(&self, _entity: &EntityRef) -> Result<Option<EntityRef>> {
        Ok(None)
    }
}

/// Reverse usage index: which entities reference a given entity.
#[async_trait]
pub trait UsageIndex: Send + Sync {
    /// Sources referencing `entity`, grouped by entity type.
    async fn list_sources(&self, entity: &EntityRef) -> Result<Vec<UsageSource>>;
}
