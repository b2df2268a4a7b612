//! Durable work queues scoped to one build and one stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{BuildId, ResourceId, Result};

/// Payload of a queued work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WorkItem {
    /// Index into the build contents or artifacts.
    Index(usize),
    /// A site path discovered while generating.
    Path(String),
}

/// A work item claimed from a queue. Must be deleted, released or delayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedItem {
    pub id: ResourceId,
    pub item: WorkItem,
}

/// Pipeline stages that own a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStage {
    Generate,
    Assets,
    Deploy,
}

impl QueueStage {
    fn prefix(&self) -> &'static str {
        match self {
            QueueStage::Generate => "preview_site_generate",
            QueueStage::Assets => "preview_site_assets",
            QueueStage::Deploy => "preview_site_deploy",
        }
    }
}

/// Name of the queue for a build and stage, e.g. `preview_site_assets:12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueName {
    pub stage: QueueStage,
    pub build_id: BuildId,
}

impl QueueName {
    pub fn new(stage: QueueStage, build_id: BuildId) -> Self {
        Self { stage, build_id }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stage.prefix(), self.build_id)
    }
}

/// A named FIFO queue of work items.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Declare the queue. Idempotent.
    async fn create_queue(&self) -> Result<()>;

    /// Drop the queue and every item in it.
    async fn delete_queue(&self) -> Result<()>;

    async fn enqueue(&self, item: WorkItem) -> Result<()>;

    /// Atomically claim the oldest available item.
    async fn claim_one(&self) -> Result<Option<ClaimedItem>>;

    /// Remove a claimed item after it was processed.
    async fn delete_claimed(&self, claimed: &ClaimedItem) -> Result<()>;

    /// Put a claimed item back so it can be claimed again.
    async fn release(&self, claimed: &ClaimedItem) -> Result<()>;

    /// Whether [`WorkQueue::delay`] honours the delay.
    fn supports_delay(&self) -> bool {
        false
    }

    /// Put a claimed item back, unavailable until `delay` has passed.
    async fn delay(&self, claimed: &ClaimedItem, delay: Duration) -> Result<()> {
        let _ = delay;
        self.release(claimed).await
    }

    /// Number of items in the queue, claimed ones included.
    async fn count(&self) -> Result<u64>;
}

/// Hands out queue handles by name.
pub trait QueueFactory: Send + Sync {
    fn get(&self, name: QueueName) -> Arc<dyn WorkQueue>;
}
