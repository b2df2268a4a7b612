//! Filesystem deploy plugin.
//!
//! Copies each artifact to `target_root/<naming>/<relative path>`, where
//! `naming` is a template over build variables.

use async_trait::async_trait;
use preview_config::VariableContext;
use preview_core::{ArtifactRef, Build, DeployPlugin, Error, PluginSettings, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

pub const FILESYSTEM_PLUGIN_ID: &str = "filesystem";

const DEFAULT_NAMING: &str = "${build.uuid}";

/// Outcome of removing a build's deployed files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownStats {
    pub attempted: usize,
    pub removed: usize,
}

#[derive(Debug, Clone)]
pub struct FilesystemDeployer {
    target_root: PathBuf,
    naming: String,
    base_url: Option<String>,
}

impl FilesystemDeployer {
    pub fn new(target_root: impl Into<PathBuf>) -> Self {
        Self {
            target_root: target_root.into(),
            naming: DEFAULT_NAMING.to_string(),
            base_url: None,
        }
    }

    /// Build from strategy settings: `target-root` (required), `naming` and
    /// `base-url`.
    pub fn from_settings(settings: &PluginSettings) -> Result<Self> {
        let target_root = settings.get("target-root").ok_or_else(|| {
            Error::Plugin("filesystem deployer requires a target-root setting".to_string())
        })?;
        let mut deployer = Self::new(target_root);
        if let Some(naming) = settings.get("naming") {
            deployer.naming = naming.clone();
        }
        deployer.base_url = settings.get("base-url").cloned();
        Ok(deployer)
    }

    pub fn with_naming(mut self, naming: impl Into<String>) -> Self {
        self.naming = naming.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn name_for(&self, build: &Build) -> String {
        VariableContext::for_build(build)
            .interpolate(&self.naming)
            .trim_matches('/')
            .to_string()
    }

    /// Directory the build is deployed into.
    pub fn site_dir(&self, build: &Build) -> PathBuf {
        self.target_root.join(self.name_for(build))
    }

    fn destination(&self, build: &Build, file: &ArtifactRef) -> PathBuf {
        self.site_dir(build).join(&file.relative_path)
    }

    /// Remove every deployed artifact, one attempt each, then prune the
    /// directories left empty.
    pub async fn teardown(&self, build: &Build) -> TeardownStats {
        let site_dir = self.site_dir(build);
        let mut stats = TeardownStats::default();
        let mut dirs = BTreeSet::new();

        for file in &build.artifacts {
            let destination = self.destination(build, file);
            stats.attempted += 1;
            match tokio::fs::remove_file(&destination).await {
                Ok(()) => {
                    stats.removed += 1;
                    info!(build_id = %build.id, path = %destination.display(), "Removed deployed file");
                }
                Err(e) => {
                    warn!(
                        build_id = %build.id,
                        path = %destination.display(),
                        error = %e,
                        "Failed to remove deployed file"
                    );
                }
            }
            let mut dir = destination.parent();
            while let Some(d) = dir {
                if !d.starts_with(&site_dir) {
                    break;
                }
                dirs.insert(d.to_path_buf());
                dir = d.parent();
            }
        }

        // Deepest first so parents are empty by the time they are reached.
        let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            prune_dir(&dir).await;
        }
        stats
    }
}

async fn prune_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir(dir).await {
        debug!(path = %dir.display(), error = %e, "Directory kept");
    }
}

#[async_trait]
impl DeployPlugin for FilesystemDeployer {
    fn id(&self) -> &str {
        FILESYSTEM_PLUGIN_ID
    }

    async fn deploy_artifact(&self, build: &Build, file: &ArtifactRef) -> Result<()> {
        let destination = self.destination(build, file);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::DeploymentFailed(format!("{}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::copy(&file.path, &destination)
            .await
            .map_err(|e| Error::DeploymentFailed(format!("{}: {}", destination.display(), e)))?;
        debug!(build_id = %build.id, path = %destination.display(), "Deployed artifact");
        Ok(())
    }

    fn deployment_base_uri(&self, build: &Build) -> Option<String> {
        let name = self.name_for(build);
        match &self.base_url {
            Some(base) => Some(format!("{}/{}/", base.trim_end_matches('/'), name)),
            None => Url::from_directory_path(self.site_dir(build))
                .ok()
                .map(|url| url.to_string()),
        }
    }

    async fn complete_deployment(&self, build: &mut Build) -> Result<()> {
        info!(
            build_id = %build.id,
            path = %self.site_dir(build).display(),
            artifacts = build.artifacts.len(),
            "Deployment complete"
        );
        Ok(())
    }

    async fn decommission(&self, build: &mut Build) -> Result<()> {
        let stats = self.teardown(build).await;
        build.add_log_entry(format!(
            "Removed {} of {} deployed files",
            stats.removed, stats.attempted
        ));
        Ok(())
    }

    async fn delete(&self, build: &Build) -> Result<()> {
        self.teardown(build).await;
        Ok(())
    }
}
