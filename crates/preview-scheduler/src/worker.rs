//! Workers processing one queued item at a time.

use crate::lifecycle::BuildLifecycle;
use async_trait::async_trait;
use preview_core::{
    Build, BuildId, GeneratePlugin, QueueFactory, QueueName, QueueStage, Result, WorkItem,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What a worker needs to load builds and reach the queues.
#[derive(Clone)]
pub struct WorkerContext {
    pub lifecycle: BuildLifecycle,
    pub queues: Arc<dyn QueueFactory>,
}

/// Processes a single item claimed from a build's stage queue.
///
/// Returning [`preview_core::Error::RetryRequested`] or
/// [`preview_core::Error::DelayRequested`] puts the item back on the queue.
#[async_trait]
pub trait QueueWorker: Send + Sync {
    async fn process_item(&self, build_id: BuildId, item: &WorkItem) -> Result<()>;
}

/// Worker for the queue of `stage`.
pub fn worker_for(stage: QueueStage, ctx: WorkerContext) -> Box<dyn QueueWorker> {
    match stage {
        QueueStage::Generate | QueueStage::Assets => Box::new(GenerateWorker { ctx }),
        QueueStage::Deploy => Box::new(DeployWorker { ctx }),
    }
}

/// Record a problem that skips the item without failing the build.
async fn soft_fail(lifecycle: &BuildLifecycle, build: &mut Build, message: String) -> Result<()> {
    error!(build_id = %build.id, "{}", message);
    build.add_log_entry(message);
    lifecycle.save(build).await
}

/// Generates content items (by index) and site paths (assets).
struct GenerateWorker {
    ctx: WorkerContext,
}

impl GenerateWorker {
    /// Generate plugin and base URL for `build`, or `None` after logging
    /// why generation cannot happen.
    async fn target(&self, build: &mut Build) -> Result<Option<(Arc<dyn GeneratePlugin>, String)>> {
        let lifecycle = &self.ctx.lifecycle;
        let Some(strategy) = lifecycle.strategy_for(build) else {
            let message = format!(
                "Preview site build {} ({}) is not associated with a build strategy.",
                build.label, build.id
            );
            soft_fail(lifecycle, build, message).await?;
            return Ok(None);
        };
        let Some(deploy) = strategy.deploy.clone() else {
            let message = format!(
                "Preview site build {} ({}) is configured to use the {} strategy, but the deploy plugin for that strategy is not configured.",
                build.label,
                build.id,
                strategy.label()
            );
            soft_fail(lifecycle, build, message).await?;
            return Ok(None);
        };
        let Some(base_url) = deploy.deployment_base_uri(build) else {
            let message = format!(
                "Preview site build {} ({}) is configured to use the {} strategy, but the {} deploy plugin did not provide a base URL for deployment.",
                build.label,
                build.id,
                strategy.label(),
                strategy.strategy.deploy.plugin
            );
            soft_fail(lifecycle, build, message).await?;
            return Ok(None);
        };
        let Some(generate) = strategy.generate.clone() else {
            let message = format!(
                "Preview site build {} ({}) is configured to use the {} strategy, but the generate plugin for that strategy is not configured.",
                build.label,
                build.id,
                strategy.label()
            );
            soft_fail(lifecycle, build, message).await?;
            return Ok(None);
        };
        Ok(Some((generate, base_url)))
    }
}

#[async_trait]
impl QueueWorker for GenerateWorker {
    async fn process_item(&self, build_id: BuildId, item: &WorkItem) -> Result<()> {
        let mut build = self.ctx.lifecycle.load(build_id).await?;
        let Some((generate, base_url)) = self.target(&mut build).await? else {
            return Ok(());
        };
        let asset_queue = self
            .ctx
            .queues
            .get(QueueName::new(QueueStage::Assets, build_id));

        let files = match item {
            WorkItem::Index(index) => {
                let Some(entity) = build.item(*index).cloned() else {
                    warn!(build_id = %build_id, index, "No content item at index");
                    return Ok(());
                };
                debug!(build_id = %build_id, entity = %entity, "Generating content item");
                generate
                    .generate_for_item(&mut build, &entity, &base_url, asset_queue.as_ref())
                    .await?
            }
            WorkItem::Path(path) => {
                debug!(build_id = %build_id, path = %path, "Generating path");
                generate
                    .generate_for_path(&mut build, path, &base_url, asset_queue.as_ref())
                    .await?
            }
        };

        for file in files {
            build.add_artifact(file);
        }
        self.ctx.lifecycle.save(&mut build).await
    }
}

/// Hands one artifact (by index) to the deploy plugin.
struct DeployWorker {
    ctx: WorkerContext,
}

#[async_trait]
impl QueueWorker for DeployWorker {
    async fn process_item(&self, build_id: BuildId, item: &WorkItem) -> Result<()> {
        let lifecycle = &self.ctx.lifecycle;
        let mut build = lifecycle.load(build_id).await?;
        let WorkItem::Index(index) = item else {
            warn!(build_id = %build_id, ?item, "Deploy queue only holds artifact indexes");
            return Ok(());
        };
        let Some(file) = build.artifact(*index).cloned() else {
            warn!(build_id = %build_id, index, "No artifact at index");
            return Ok(());
        };
        let Some(deploy) = lifecycle.strategy_for(&build).and_then(|s| s.deploy.clone()) else {
            let message = format!(
                "ERROR: No deploy plugin available for artifact {}",
                file.relative_path
            );
            return soft_fail(lifecycle, &mut build, message).await;
        };

        match deploy.deploy_artifact(&build, &file).await {
            Ok(()) => {
                debug!(build_id = %build_id, path = %file.relative_path, "Deployed artifact");
                Ok(())
            }
            Err(e) => {
                let message = format!(
                    "ERROR: Failed to deploy artifact {}: {}",
                    file.relative_path, e
                );
                soft_fail(lifecycle, &mut build, message).await
            }
        }
    }
}
