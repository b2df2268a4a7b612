//! The build aggregate: status, contents and the artifact ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ArtifactRef, BuildId, EntityRef, Error, ResourceId, Result};

/// Status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Building,
    Built,
    Failed,
    /// Set externally when content in the build changed after deployment.
    Stale,
    Decommissioned,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Building => "building",
            BuildStatus::Built => "built",
            BuildStatus::Failed => "failed",
            BuildStatus::Stale => "stale",
            BuildStatus::Decommissioned => "decommissioned",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "building" => Ok(BuildStatus::Building),
            "built" => Ok(BuildStatus::Built),
            "failed" => Ok(BuildStatus::Failed),
            "stale" => Ok(BuildStatus::Stale),
            "decommissioned" => Ok(BuildStatus::Decommissioned),
            other => Err(Error::InvalidInput(format!("unknown build status: {}", other))),
        }
    }
}

/// Fields needed to create a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBuild {
    pub label: String,
    pub strategy: String,
    pub contents: Vec<EntityRef>,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// A preview site build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    /// Token written into the building lock.
    pub uuid: ResourceId,
    pub label: String,
    pub status: BuildStatus,
    pub strategy: String,
    /// Items to generate, in generation order. Generate queue items address
    /// this list by index.
    pub contents: Vec<EntityRef>,
    pub artifacts: Vec<ArtifactRef>,
    pub log: Vec<String>,
    pub processed_paths: Vec<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

impl Build {
    /// Build a pending record from creation input.
    pub fn new(id: BuildId, input: NewBuild) -> Self {
        let now = Utc::now();
        Self {
            id,
            uuid: ResourceId::new(),
            label: input.label,
            status: BuildStatus::Pending,
            strategy: input.strategy,
            contents: input.contents,
            artifacts: Vec::new(),
            log: Vec::new(),
            processed_paths: Vec::new(),
            expiry_date: input.expiry_date,
            deployed_at: None,
            created_at: now,
            changed_at: now,
        }
    }

    pub fn add_log_entry(&mut self, entry: impl Into<String>) {
        self.log.push(entry.into());
    }

    pub fn add_artifact(&mut self, artifact: ArtifactRef) {
        self.add_log_entry(format!("Added artifact {}", artifact.relative_path));
        self.artifacts.push(artifact);
    }

    pub fn mark_path_processed(&mut self, path: &str) {
        self.add_log_entry(format!("Marked path {} as processed", path));
        if !self.has_path_been_processed(path) {
            self.processed_paths.push(path.to_string());
        }
    }

    pub fn has_path_been_processed(&self, path: &str) -> bool {
        self.processed_paths.iter().any(|p| p == path)
    }

    pub fn item(&self, index: usize) -> Option<&EntityRef> {
        self.contents.get(index)
    }

    pub fn artifact(&self, index: usize) -> Option<&ArtifactRef> {
        self.artifacts.get(index)
    }

    /// Whether the entity is listed directly in the build contents.
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.contents.iter().any(|item| item == entity)
    }

    /// Ids of `entity_type` from `ids` that are listed directly in the build.
    pub fn matching_contents<'a>(&self, entity_type: &str, ids: &'a [String]) -> Vec<&'a str> {
        ids.iter()
            .filter(|id| {
                self.contents
                    .iter()
                    .any(|item| item.entity_type == entity_type && &item.id == *id)
            })
            .map(String::as_str)
            .collect()
    }

    pub fn is_failed(&self) -> bool {
        self.status == BuildStatus::Failed
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= now)
    }

    /// Reset the ledger for a new attempt and enter `Building`.
    ///
    /// Returns the artifacts of the previous attempt.
    pub fn begin_attempt(&mut self) -> Vec<ArtifactRef> {
        let previous = std::mem::take(&mut self.artifacts);
        self.log.clear();
        self.processed_paths.clear();
        self.status = BuildStatus::Building;
        self.add_log_entry("Starting deployment");
        previous
    }

    pub fn is_decommissioned(&self) -> bool {
        self.status == BuildStatus::Decommissioned
    }

    /// End an attempt. A failure recorded during the run is kept, and a
    /// decommissioned build stays decommissioned.
    pub fn complete_attempt(&mut self, now: DateTime<Utc>) {
        if !self.is_failed() && !self.is_decommissioned() {
            self.status = BuildStatus::Built;
        }
        self.deployed_at = Some(now);
        self.add_log_entry("Finishing deployment");
    }

    pub fn mark_failed(&mut self) {
        self.status = BuildStatus::Failed;
        self.add_log_entry("Deployment failed");
    }

    pub fn mark_decommissioned(&mut self) {
        self.status = BuildStatus::Decommissioned;
        self.add_log_entry("Decommissioned preview site build");
    }
}
