//! Artifact storage abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ResourceId, Result};

/// Reference to a file produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: ResourceId,
    /// Absolute location of the file on local storage.
    pub path: PathBuf,
    /// Path relative to the build's artifact base path, `/` separated.
    pub relative_path: String,
    /// Content hash for integrity.
    pub checksum: String,
    /// Size in bytes.
    pub size: u64,
    /// When the artifact was registered.
    pub created_at: DateTime<Utc>,
}

/// Ordered set of files produced by one generate call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCollection {
    files: Vec<ArtifactRef>,
}

impl FileCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, file: ArtifactRef) {
        self.files.push(file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArtifactRef> {
        self.files.iter()
    }
}

impl From<Vec<ArtifactRef>> for FileCollection {
    fn from(files: Vec<ArtifactRef>) -> Self {
        Self { files }
    }
}

impl IntoIterator for FileCollection {
    type Item = ArtifactRef;
    type IntoIter = std::vec::IntoIter<ArtifactRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

/// Trait for artifact storage backends.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Register a file that a generator wrote under `base`.
    ///
    /// Fails with [`crate::Error::CouldNotWriteFile`] when the file does not
    /// exist.
    async fn register(&self, base: &Path, file: &Path) -> Result<ArtifactRef>;

    /// Delete the stored file behind an artifact.
    async fn delete(&self, reference: &ArtifactRef) -> Result<()>;
}
