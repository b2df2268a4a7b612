//! Pipeline orchestrator - runs a build through its steps one queue item at
//! a time.

use crate::lifecycle::BuildLifecycle;
use crate::worker::{WorkerContext, worker_for};
use preview_config::site::DEFAULT_CLEANUP_BATCH_SIZE;
use preview_core::{
    ArtifactRef, ArtifactStore, BuildId, BuildStatus, Error, QueueFactory, QueueName, QueueStage,
    Result, WorkItem,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// The fixed sequence of steps a build goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStep {
    MarkStarted,
    QueueGenerate,
    ProcessGenerate,
    ProcessAssets,
    QueueDeploy,
    ProcessDeploy,
    MarkFinished,
}

impl BuildStep {
    pub const ALL: [BuildStep; 7] = [
        BuildStep::MarkStarted,
        BuildStep::QueueGenerate,
        BuildStep::ProcessGenerate,
        BuildStep::ProcessAssets,
        BuildStep::QueueDeploy,
        BuildStep::ProcessDeploy,
        BuildStep::MarkFinished,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStep::MarkStarted => "mark_started",
            BuildStep::QueueGenerate => "queue_generate",
            BuildStep::ProcessGenerate => "process_generate",
            BuildStep::ProcessAssets => "process_assets",
            BuildStep::QueueDeploy => "queue_deploy",
            BuildStep::ProcessDeploy => "process_deploy",
            BuildStep::MarkFinished => "mark_finished",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted while a build runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    StageStarted {
        step: BuildStep,
    },
    Progress {
        step: BuildStep,
        finished: f64,
        message: String,
    },
    StageCompleted {
        step: BuildStep,
        success: bool,
    },
    BuildCompleted {
        success: bool,
    },
}

/// Totals accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepResults {
    pub build_id: Option<BuildId>,
    pub generated: usize,
    pub assets: usize,
    pub deployed: usize,
    pub generate_errors: bool,
    pub status: Option<BuildStatus>,
}

/// Transient state carried by the driver across step calls.
///
/// Never persisted: losing it only restarts progress reporting and the
/// cleanup cursor.
#[derive(Debug, Default)]
pub struct StepContext {
    totals: HashMap<BuildStep, u64>,
    cleanup: Option<Vec<ArtifactRef>>,
    finished: f64,
    message: String,
    pub results: StepResults,
}

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of the current step done, 1.0 once it is complete.
    pub fn finished(&self) -> f64 {
        self.finished
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_finished(&self) -> bool {
        self.finished >= 1.0
    }

    fn complete(&mut self, message: impl Into<String>) {
        self.finished = 1.0;
        self.message = message.into();
    }

    /// The first call fixes the total at `remaining + 1`.
    fn update_progress(&mut self, step: BuildStep, remaining: u64) {
        if remaining == 0 {
            self.finished = 1.0;
            return;
        }
        let total = self.totals.entry(step).or_insert(remaining + 1);
        // The asset queue can grow while it drains.
        if remaining >= *total {
            *total = remaining + 1;
        }
        self.finished = (*total - remaining) as f64 / *total as f64;
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub build_id: BuildId,
    pub status: BuildStatus,
    pub generated: usize,
    pub assets: usize,
    pub deployed: usize,
    pub generate_errors: bool,
}

impl BuildReport {
    pub fn success(&self) -> bool {
        !self.generate_errors && self.status == BuildStatus::Built
    }
}

struct Drained {
    claimed: bool,
    remaining: u64,
}

fn remaining_message(action: &str, remaining: u64) -> String {
    if remaining == 1 {
        format!("{} (1 item remaining)", action)
    } else {
        format!("{} ({} items remaining)", action, remaining)
    }
}

/// Runs builds through [`BuildStep::ALL`].
#[derive(Clone)]
pub struct PipelineOrchestrator {
    ctx: WorkerContext,
    store: Arc<dyn ArtifactStore>,
    cleanup_batch_size: usize,
}

impl PipelineOrchestrator {
    pub fn new(
        lifecycle: BuildLifecycle,
        queues: Arc<dyn QueueFactory>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            ctx: WorkerContext { lifecycle, queues },
            store,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
        }
    }

    /// Intermediate files deleted per `mark_finished` call.
    pub fn with_cleanup_batch_size(mut self, size: usize) -> Self {
        self.cleanup_batch_size = size.max(1);
        self
    }

    pub fn lifecycle(&self) -> &BuildLifecycle {
        &self.ctx.lifecycle
    }

    /// Run a build, returning a channel of events and a handle to get the
    /// final report.
    pub fn execute(
        &self,
        build_id: BuildId,
    ) -> (
        mpsc::Receiver<BuildEvent>,
        tokio::task::JoinHandle<Result<BuildReport>>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.execute_inner(build_id, tx).await });
        (rx, handle)
    }

    /// Run a build to completion without reporting events.
    pub async fn run(&self, build_id: BuildId) -> Result<BuildReport> {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        self.execute_inner(build_id, tx).await
    }

    async fn execute_inner(
        &self,
        build_id: BuildId,
        tx: mpsc::Sender<BuildEvent>,
    ) -> Result<BuildReport> {
        let mut ctx = StepContext::new();

        for step in BuildStep::ALL {
            let _ = tx.send(BuildEvent::StageStarted { step }).await;
            info!(build_id = %build_id, step = %step, "Step started");

            loop {
                if let Err(e) = self.run_step(step, build_id, &mut ctx).await {
                    error!(build_id = %build_id, step = %step, error = %e, "Step failed");
                    let _ = tx
                        .send(BuildEvent::StageCompleted {
                            step,
                            success: false,
                        })
                        .await;
                    self.handle_failure(build_id, &e).await;
                    let _ = tx.send(BuildEvent::BuildCompleted { success: false }).await;
                    return Err(e);
                }
                let _ = tx
                    .send(BuildEvent::Progress {
                        step,
                        finished: ctx.finished(),
                        message: ctx.message().to_string(),
                    })
                    .await;
                if ctx.is_finished() {
                    break;
                }
            }

            info!(build_id = %build_id, step = %step, "Step completed");
            let _ = tx
                .send(BuildEvent::StageCompleted {
                    step,
                    success: true,
                })
                .await;
        }

        let results = &ctx.results;
        let report = BuildReport {
            build_id,
            status: results.status.unwrap_or(BuildStatus::Built),
            generated: results.generated,
            assets: results.assets,
            deployed: results.deployed,
            generate_errors: results.generate_errors,
        };
        let _ = tx
            .send(BuildEvent::BuildCompleted {
                success: report.success(),
            })
            .await;
        Ok(report)
    }

    /// Mark the build failed after a step error, releasing the lock if this
    /// build holds it. A lock held by another build is left alone, and a
    /// decommissioned build keeps its status.
    async fn handle_failure(&self, build_id: BuildId, err: &Error) {
        if matches!(err, Error::GenerationInProgress(_)) {
            return;
        }
        let lifecycle = &self.ctx.lifecycle;
        let result = async {
            let mut build = lifecycle.load(build_id).await?;
            let holds_lock = lifecycle.holds_lock(&build).await?;
            if build.is_decommissioned() {
                if holds_lock {
                    lifecycle.force_reset().await?;
                }
            } else if !build.is_failed() {
                lifecycle.deployment_failed(&mut build, holds_lock).await?;
            } else if holds_lock {
                lifecycle.force_reset().await?;
            }
            Ok::<_, Error>(())
        }
        .await;
        if let Err(e) = result {
            error!(build_id = %build_id, error = %e, "Failed to record build failure");
        }
    }

    /// Run one call of `step`. The driver repeats the call until
    /// [`StepContext::is_finished`].
    pub async fn run_step(
        &self,
        step: BuildStep,
        build_id: BuildId,
        ctx: &mut StepContext,
    ) -> Result<()> {
        match step {
            BuildStep::MarkStarted => self.mark_started(build_id, ctx).await,
            BuildStep::QueueGenerate => self.queue_generate(build_id, ctx).await,
            BuildStep::ProcessGenerate => {
                let drained = self.process_queue_item(QueueStage::Generate, build_id).await?;
                ctx.update_progress(step, drained.remaining);
                if drained.claimed {
                    ctx.results.generated += 1;
                }
                ctx.message = remaining_message(
                    "Generating previews for content items",
                    drained.remaining,
                );
                Ok(())
            }
            BuildStep::ProcessAssets => {
                let drained = self.process_queue_item(QueueStage::Assets, build_id).await?;
                ctx.update_progress(step, drained.remaining);
                if drained.claimed {
                    ctx.results.assets += 1;
                }
                ctx.message =
                    remaining_message("Generating assets for content items", drained.remaining);
                Ok(())
            }
            BuildStep::QueueDeploy => self.queue_deploy(build_id, ctx).await,
            BuildStep::ProcessDeploy => {
                let drained = self.process_queue_item(QueueStage::Deploy, build_id).await?;
                ctx.update_progress(step, drained.remaining);
                if drained.claimed {
                    ctx.results.deployed += 1;
                }
                ctx.message = remaining_message("Deploying artifacts", drained.remaining);
                Ok(())
            }
            BuildStep::MarkFinished => self.mark_finished(build_id, ctx).await,
        }
    }

    async fn mark_started(&self, build_id: BuildId, ctx: &mut StepContext) -> Result<()> {
        ctx.results.build_id = Some(build_id);
        let previous = self.ctx.lifecycle.start_deployment(build_id).await?;
        debug!(build_id = %build_id, previous = previous.len(), "Previous artifacts released");
        ctx.complete("Marked deployment as building");
        Ok(())
    }

    async fn queue_generate(&self, build_id: BuildId, ctx: &mut StepContext) -> Result<()> {
        let build = self.ctx.lifecycle.load(build_id).await?;
        let assets = self.ctx.queues.get(QueueName::new(QueueStage::Assets, build_id));
        let generate = self
            .ctx
            .queues
            .get(QueueName::new(QueueStage::Generate, build_id));
        for queue in [&assets, &generate] {
            queue.delete_queue().await?;
            queue.create_queue().await?;
        }
        for index in 0..build.contents.len() {
            generate.enqueue(WorkItem::Index(index)).await?;
        }
        info!(build_id = %build_id, items = build.contents.len(), "Queued content items");
        ctx.complete("Queued content items for preview generation");
        Ok(())
    }

    async fn queue_deploy(&self, build_id: BuildId, ctx: &mut StepContext) -> Result<()> {
        let lifecycle = &self.ctx.lifecycle;
        let mut build = lifecycle.load(build_id).await?;
        if let Some(generate) = lifecycle.strategy_for(&build).and_then(|s| s.generate.clone()) {
            generate.complete_build(&mut build).await?;
            lifecycle.save(&mut build).await?;
        }

        let deploy = self.ctx.queues.get(QueueName::new(QueueStage::Deploy, build_id));
        deploy.delete_queue().await?;
        deploy.create_queue().await?;
        for index in 0..build.artifacts.len() {
            deploy.enqueue(WorkItem::Index(index)).await?;
        }
        info!(build_id = %build_id, artifacts = build.artifacts.len(), "Queued artifacts");
        ctx.complete("Queued artifacts for deployment");
        Ok(())
    }

    /// Finish the deployment on the first call, then delete the build's
    /// intermediate files one batch per call.
    async fn mark_finished(&self, build_id: BuildId, ctx: &mut StepContext) -> Result<()> {
        if ctx.cleanup.is_none() {
            let build = self.ctx.lifecycle.finish_deployment(build_id).await?;
            ctx.results.status = Some(build.status);
            ctx.totals
                .insert(BuildStep::MarkFinished, build.artifacts.len() as u64);
            ctx.cleanup = Some(build.artifacts);
        }

        let batch: Vec<ArtifactRef> = match ctx.cleanup.as_mut() {
            Some(files) => {
                let size = self.cleanup_batch_size.min(files.len());
                files.drain(..size).collect()
            }
            None => Vec::new(),
        };
        for file in &batch {
            if let Err(e) = self.store.delete(file).await {
                warn!(build_id = %build_id, path = %file.path.display(), error = %e, "Failed to delete intermediate file");
            }
        }

        let remaining = ctx.cleanup.as_ref().map_or(0, |files| files.len() as u64);
        ctx.update_progress(BuildStep::MarkFinished, remaining);
        if ctx.is_finished() {
            let status = ctx.results.status.unwrap_or(BuildStatus::Built);
            if status == BuildStatus::Failed {
                ctx.results.generate_errors = true;
            }
            ctx.message = format!("Marked deployment as {}", status);
        } else {
            ctx.message = "Deleting old artifacts".to_string();
        }
        Ok(())
    }

    /// Process at most one item from a stage queue.
    async fn process_queue_item(&self, stage: QueueStage, build_id: BuildId) -> Result<Drained> {
        let name = QueueName::new(stage, build_id);
        let queue = self.ctx.queues.get(name);
        let Some(claimed) = queue.claim_one().await? else {
            return Ok(Drained {
                claimed: false,
                remaining: 0,
            });
        };
        queue.create_queue().await?;

        let worker = worker_for(stage, self.ctx.clone());
        match worker.process_item(build_id, &claimed.item).await {
            Ok(()) => queue.delete_claimed(&claimed).await?,
            Err(Error::DelayRequested { delay }) => {
                if queue.supports_delay() {
                    debug!(queue = %name, ?delay, "Delaying queue item");
                    queue.delay(&claimed, delay).await?;
                } else {
                    queue.release(&claimed).await?;
                }
            }
            Err(Error::RetryRequested) => {
                debug!(queue = %name, "Requeueing queue item");
                queue.release(&claimed).await?;
            }
            Err(e) => {
                queue.release(&claimed).await?;
                return Err(e);
            }
        }

        Ok(Drained {
            claimed: true,
            remaining: queue.count().await?,
        })
    }
}

impl fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("lifecycle", &self.ctx.lifecycle)
            .field("cleanup_batch_size", &self.cleanup_batch_size)
            .finish()
    }
}
