//! In-memory implementations for tests and ephemeral runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use preview_core::{
    Build, BuildId, ClaimedItem, NewBuild, QueueFactory, QueueName, ResourceId, StateStore,
    WorkItem, WorkQueue,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{BuildRepo, DEFAULT_CLAIM_LEASE, DbError, DbResult};

#[derive(Default)]
struct BuildTable {
    next_id: i64,
    builds: BTreeMap<BuildId, Build>,
}

/// Build repository held in process memory.
#[derive(Default)]
pub struct MemoryBuildRepo {
    table: Mutex<BuildTable>,
}

impl MemoryBuildRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildRepo for MemoryBuildRepo {
    async fn create(&self, input: NewBuild) -> DbResult<Build> {
        let mut table = self.table.lock().await;
        table.next_id += 1;
        let build = Build::new(BuildId::new(table.next_id), input);
        table.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn get(&self, id: BuildId) -> DbResult<Build> {
        self.table
            .lock()
            .await
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    async fn get_by_uuid(&self, uuid: ResourceId) -> DbResult<Build> {
        self.table
            .lock()
            .await
            .builds
            .values()
            .find(|b| b.uuid == uuid)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {}", uuid)))
    }

    async fn save(&self, build: &mut Build) -> DbResult<()> {
        let mut table = self.table.lock().await;
        let slot = table
            .builds
            .get_mut(&build.id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", build.id)))?;
        build.changed_at = Utc::now();
        *slot = build.clone();
        Ok(())
    }

    async fn delete(&self, id: BuildId) -> DbResult<()> {
        self.table.lock().await.builds.remove(&id);
        Ok(())
    }

    async fn list(&self) -> DbResult<Vec<Build>> {
        Ok(self.table.lock().await.builds.values().cloned().collect())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> DbResult<Vec<Build>> {
        let mut expired: Vec<Build> = self
            .table
            .lock()
            .await
            .builds
            .values()
            .filter(|b| b.is_expired(now) && b.status != preview_core::BuildStatus::Decommissioned)
            .cloned()
            .collect();
        expired.sort_by_key(|b| b.expiry_date);
        Ok(expired)
    }
}

struct QueueEntry {
    id: ResourceId,
    item: WorkItem,
    claimed_at: Option<Instant>,
    available_at: Option<Instant>,
}

impl QueueEntry {
    fn is_claimable(&self, now: Instant, lease: Duration) -> bool {
        match self.claimed_at {
            Some(at) => now.duration_since(at) >= lease,
            None => self.available_at.is_none_or(|at| at <= now),
        }
    }
}

/// FIFO queue held in process memory.
///
/// A claim whose lease has run out makes the item claimable again.
pub struct MemoryWorkQueue {
    entries: Mutex<Vec<QueueEntry>>,
    delay_support: bool,
    lease: Duration,
}

impl MemoryWorkQueue {
    pub fn new(delay_support: bool) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            delay_support,
            lease: DEFAULT_CLAIM_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn unclaim(&self, claimed: &ClaimedItem, available_at: Option<Instant>) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.id == claimed.id) {
            entry.claimed_at = None;
            entry.available_at = available_at;
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn create_queue(&self) -> preview_core::Result<()> {
        Ok(())
    }

    async fn delete_queue(&self) -> preview_core::Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn enqueue(&self, item: WorkItem) -> preview_core::Result<()> {
        self.entries.lock().await.push(QueueEntry {
            id: ResourceId::new(),
            item,
            claimed_at: None,
            available_at: None,
        });
        Ok(())
    }

    async fn claim_one(&self) -> preview_core::Result<Option<ClaimedItem>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.is_claimable(now, self.lease));
        Ok(entry.map(|entry| {
            entry.claimed_at = Some(now);
            ClaimedItem {
                id: entry.id,
                item: entry.item.clone(),
            }
        }))
    }

    async fn delete_claimed(&self, claimed: &ClaimedItem) -> preview_core::Result<()> {
        self.entries.lock().await.retain(|e| e.id != claimed.id);
        Ok(())
    }

    async fn release(&self, claimed: &ClaimedItem) -> preview_core::Result<()> {
        self.unclaim(claimed, None).await;
        Ok(())
    }

    fn supports_delay(&self) -> bool {
        self.delay_support
    }

    async fn delay(&self, claimed: &ClaimedItem, delay: Duration) -> preview_core::Result<()> {
        let available_at = self.delay_support.then(|| Instant::now() + delay);
        self.unclaim(claimed, available_at).await;
        Ok(())
    }

    async fn count(&self) -> preview_core::Result<u64> {
        Ok(self.entries.lock().await.len() as u64)
    }
}

/// Hands out one shared [`MemoryWorkQueue`] per queue name.
#[derive(Default)]
pub struct MemoryQueueFactory {
    queues: std::sync::Mutex<HashMap<QueueName, Arc<MemoryWorkQueue>>>,
    delay_support: bool,
}

impl MemoryQueueFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose queues honour delays instead of releasing immediately.
    pub fn with_delay_support() -> Self {
        Self {
            queues: Default::default(),
            delay_support: true,
        }
    }
}

impl QueueFactory for MemoryQueueFactory {
    fn get(&self, name: QueueName) -> Arc<dyn WorkQueue> {
        let mut queues = self
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queues
            .entry(name)
            .or_insert_with(|| Arc::new(MemoryWorkQueue::new(self.delay_support)))
            .clone()
    }
}

/// Key-value state held in process memory.
#[derive(Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> preview_core::Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> preview_core::Result<()> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> preview_core::Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}
