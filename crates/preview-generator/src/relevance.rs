//! Relevance of content entities to a build.
//!
//! An entity is relevant when it is in the build contents, when its parent
//! is, or when something referencing it is, transitively. Traversal is
//! memoized per check and capped by a depth counter shared across the whole
//! check, so it terminates on cyclic reference graphs. The cap counts
//! recursions rather than path length; a deep but valid chain can be cut
//! short, which is accepted in exchange for bounded work.

use async_recursion::async_recursion;
use async_trait::async_trait;
use preview_core::{
    Build, EntityRef, NoParent, ParentResolver, Result, UsageIndex, UsageSource,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

use crate::render::EntityVisibility;

/// Recursions allowed per relevance check.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Traversal state for one relevance check.
#[derive(Debug, Default)]
pub struct Seen {
    /// Absent: unvisited. Present: settled or in progress (false until proven).
    memo: HashMap<EntityRef, bool>,
    /// Recursions made so far, never decremented.
    depth: usize,
}

impl Seen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: &EntityRef) -> Option<bool> {
        self.memo.get(entity).copied()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn set(&mut self, entity: &EntityRef, relevant: bool) {
        self.memo.insert(entity.clone(), relevant);
    }
}

pub struct RelevanceGraph {
    parents: HashMap<String, Arc<dyn ParentResolver>>,
    usage: Arc<dyn UsageIndex>,
    /// Entity types that hold references but are not content (users, files).
    non_content_types: HashSet<String>,
    max_depth: usize,
}

impl RelevanceGraph {
    pub fn new(usage: Arc<dyn UsageIndex>) -> Self {
        Self {
            parents: HashMap::new(),
            usage,
            non_content_types: HashSet::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Graph over an in-memory usage graph, resolving parents from it too.
    pub fn from_usage_graph(graph: UsageGraph) -> Self {
        let non_content: Vec<String> = graph.non_content_types.clone();
        let child_types: HashSet<String> = graph
            .parents
            .iter()
            .map(|link| link.child.entity_type.clone())
            .collect();
        let graph = Arc::new(graph);
        let mut relevance = Self::new(graph.clone());
        for entity_type in child_types {
            relevance = relevance.with_parent_resolver(entity_type, graph.clone());
        }
        for entity_type in non_content {
            relevance = relevance.with_non_content_type(entity_type);
        }
        relevance
    }

    pub fn with_parent_resolver(
        mut self,
        entity_type: impl Into<String>,
        resolver: Arc<dyn ParentResolver>,
    ) -> Self {
        self.parents.insert(entity_type.into(), resolver);
        self
    }

    pub fn with_non_content_type(mut self, entity_type: impl Into<String>) -> Self {
        self.non_content_types.insert(entity_type.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// This graph bound to `build`, for renderers deciding what to show.
    pub fn for_build<'a>(&'a self, build: &'a Build) -> BuildRelevance<'a> {
        BuildRelevance { graph: self, build }
    }

    /// Whether `entity` may be shown in `build`.
    pub async fn is_relevant(&self, build: &Build, entity: &EntityRef) -> Result<bool> {
        let mut seen = Seen::new();
        self.is_relevant_with(build, entity, &mut seen).await
    }

    /// Relevance check sharing memo and depth with the caller.
    #[async_recursion]
    pub async fn is_relevant_with(
        &self,
        build: &Build,
        entity: &EntityRef,
        seen: &mut Seen,
    ) -> Result<bool> {
        if let Some(relevant) = seen.get(entity) {
            return Ok(relevant);
        }

        if build.contains(entity) {
            seen.set(entity, true);
            return Ok(true);
        }

        let resolver = self
            .parents
            .get(&entity.entity_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(NoParent));
        if let Some(parent) = resolver.parent_of(entity).await? {
            if build.contains(&parent) {
                seen.set(entity, true);
                seen.set(&parent, true);
                return Ok(true);
            }
        }

        let sources = self.usage.list_sources(entity).await?;
        for source in sources {
            if !build.matching_contents(&source.entity_type, &source.ids).is_empty() {
                seen.set(entity, true);
                return Ok(true);
            }
            if self.non_content_types.contains(&source.entity_type) {
                continue;
            }

            // Mark in progress so cycles back to this entity stop here.
            seen.set(entity, false);
            for id in &source.ids {
                if seen.depth >= self.max_depth {
                    trace!(entity = %entity, depth = seen.depth, "Relevance depth cap reached");
                    seen.set(entity, false);
                    return Ok(false);
                }
                seen.depth += 1;
                let dependant = EntityRef::new(source.entity_type.clone(), id.clone());
                if self.is_relevant_with(build, &dependant, seen).await? {
                    seen.set(entity, true);
                    return Ok(true);
                }
            }
        }

        seen.set(entity, false);
        Ok(false)
    }
}

/// A [`RelevanceGraph`] answering for one build.
pub struct BuildRelevance<'a> {
    graph: &'a RelevanceGraph,
    build: &'a Build,
}

#[async_trait]
impl<'a> EntityVisibility for BuildRelevance<'a> {
    async fn is_visible(&self, entity: &EntityRef) -> Result<bool> {
        self.graph.is_relevant(self.build, entity).await
    }
}

/// A reference from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLink {
    pub source: EntityRef,
    pub target: EntityRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub child: EntityRef,
    pub parent: EntityRef,
}

/// In-memory reference graph, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageGraph {
    #[serde(default)]
    pub references: Vec<UsageLink>,
    #[serde(default)]
    pub parents: Vec<ParentLink>,
    #[serde(default)]
    pub non_content_types: Vec<String>,
}

impl UsageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| preview_core::Error::InvalidInput(format!("usage graph: {}", e)))
    }

    pub fn add_reference(&mut self, source: EntityRef, target: EntityRef) -> &mut Self {
        self.references.push(UsageLink { source, target });
        self
    }

    pub fn add_parent(&mut self, child: EntityRef, parent: EntityRef) -> &mut Self {
        self.parents.push(ParentLink { child, parent });
        self
    }
}

#[async_trait]
impl UsageIndex for UsageGraph {
    async fn list_sources(&self, entity: &EntityRef) -> Result<Vec<UsageSource>> {
        let mut sources: Vec<UsageSource> = Vec::new();
        for link in self.references.iter().filter(|link| &link.target == entity) {
            let source = &link.source;
            match sources
                .iter_mut()
                .find(|group| group.entity_type == source.entity_type)
            {
                Some(group) => {
                    if !group.ids.contains(&source.id) {
                        group.ids.push(source.id.clone());
                    }
                }
                None => sources.push(UsageSource {
                    entity_type: source.entity_type.clone(),
                    ids: vec![source.id.clone()],
                }),
            }
        }
        Ok(sources)
    }
}

#[async_trait]
impl ParentResolver for UsageGraph {
    async fn parent_of(&self, entity: &EntityRef) -> Result<Option<EntityRef>> {
        Ok(self
            .parents
            .iter()
            .find(|link| &link.child == entity)
            .map(|link| link.parent.clone()))
    }
}
