//! Fake plugins and fixtures shared by the scheduler tests.

use crate::lifecycle::BuildLifecycle;
use crate::orchestrator::PipelineOrchestrator;
use crate::strategies::StrategyCatalog;
use async_trait::async_trait;
use chrono::Utc;
use preview_core::{
    ArtifactRef, ArtifactStore, Build, DeployPlugin, EntityRef, Error, FileCollection,
    GeneratePlugin, NewBuild, PluginConfig, ResourceId, Result, Strategy, WorkItem, WorkQueue,
};
use preview_db::{BuildRepo, MemoryBuildRepo, MemoryQueueFactory, MemoryStateStore};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub(crate) fn artifact(relative: &str) -> ArtifactRef {
    ArtifactRef {
        id: ResourceId::new(),
        path: PathBuf::from("/tmp/preview-test").join(relative),
        relative_path: relative.to_string(),
        checksum: String::new(),
        size: 0,
        created_at: Utc::now(),
    }
}

pub(crate) fn new_build(label: &str) -> NewBuild {
    NewBuild {
        label: label.to_string(),
        strategy: "staging".to_string(),
        contents: vec![EntityRef::new("node", "1"), EntityRef::new("node", "2")],
        expiry_date: None,
    }
}

#[derive(Default)]
pub(crate) struct FakeGenerate {
    /// Asset paths queued when generating the item with the given id.
    assets: Vec<(String, String)>,
    fail_prepare: bool,
    /// Errors returned by `generate_for_item` before it starts succeeding.
    errors: Mutex<Vec<Error>>,
    pub prepared: Mutex<Vec<Option<String>>>,
    pub completed: Mutex<usize>,
}

impl FakeGenerate {
    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn with_asset(mut self, item_id: &str, path: &str) -> Self {
        self.assets.push((item_id.to_string(), path.to_string()));
        self
    }

    pub fn with_error(self, error: Error) -> Self {
        if let Ok(mut errors) = self.errors.lock() {
            errors.insert(0, error);
        }
        self
    }
}

#[async_trait]
impl GeneratePlugin for FakeGenerate {
    fn id(&self) -> &str {
        "fake"
    }

    async fn prepare_build(&self, _build: &mut Build, base_url: Option<&str>) -> Result<()> {
        self.prepared
            .lock()
            .unwrap()
            .push(base_url.map(str::to_string));
        if self.fail_prepare {
            return Err(Error::Plugin("cannot prepare".to_string()));
        }
        Ok(())
    }

    async fn complete_build(&self, _build: &mut Build) -> Result<()> {
        *self.completed.lock().unwrap() += 1;
        Ok(())
    }

    async fn generate_for_item(
        &self,
        _build: &mut Build,
        item: &EntityRef,
        _base_url: &str,
        asset_queue: &dyn WorkQueue,
    ) -> Result<FileCollection> {
        let pending = self.errors.lock().unwrap().pop();
        if let Some(error) = pending {
            return Err(error);
        }
        for (id, path) in &self.assets {
            if *id == item.id {
                asset_queue.enqueue(WorkItem::Path(path.clone())).await?;
            }
        }
        let mut files = FileCollection::new();
        files.add_file(artifact(&format!(
            "{}/{}/index.html",
            item.entity_type, item.id
        )));
        Ok(files)
    }

    async fn generate_for_path(
        &self,
        build: &mut Build,
        path: &str,
        _base_url: &str,
        _asset_queue: &dyn WorkQueue,
    ) -> Result<FileCollection> {
        if build.has_path_been_processed(path) {
            return Ok(FileCollection::new());
        }
        build.mark_path_processed(path);
        if path.contains("broken") {
            build.add_log_entry(format!("ERROR: Could not render {}", path));
            build.mark_failed();
            return Ok(FileCollection::new());
        }
        let mut files = FileCollection::new();
        files.add_file(artifact(path.trim_start_matches('/')));
        Ok(files)
    }

    async fn is_entity_relevant(&self, build: &Build, entity: &EntityRef) -> Result<bool> {
        Ok(build.contains(entity))
    }

    fn artifact_base_path(&self, build: &Build) -> PathBuf {
        PathBuf::from("/tmp/preview-test").join(build.uuid.to_string())
    }

    fn item_path(&self, _build: &Build, item: &EntityRef) -> String {
        format!("/{}/{}", item.entity_type, item.id)
    }

    fn alter_url_to_deployed_item(&self, url: &str, _build: &Build) -> String {
        format!("{}/index.html", url)
    }
}

pub(crate) struct FakeDeploy {
    base: Option<String>,
    fail_on: Option<String>,
    fail_teardown: bool,
    pub deployed: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub completed: Mutex<usize>,
}

impl Default for FakeDeploy {
    fn default() -> Self {
        Self {
            base: Some("https://preview.test/site/".to_string()),
            fail_on: None,
            fail_teardown: false,
            deployed: Mutex::default(),
            removed: Mutex::default(),
            completed: Mutex::default(),
        }
    }
}

impl FakeDeploy {
    pub fn without_base(mut self) -> Self {
        self.base = None;
        self
    }

    pub fn failing_on(mut self, relative_path: &str) -> Self {
        self.fail_on = Some(relative_path.to_string());
        self
    }

    pub fn failing_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }
}

#[async_trait]
impl DeployPlugin for FakeDeploy {
    fn id(&self) -> &str {
        "fake"
    }

    async fn deploy_artifact(&self, _build: &Build, file: &ArtifactRef) -> Result<()> {
        if self.fail_on.as_deref() == Some(file.relative_path.as_str()) {
            return Err(Error::DeploymentFailed(format!("{} rejected", file.relative_path)));
        }
        self.deployed
            .lock()
            .unwrap()
            .push(file.relative_path.clone());
        Ok(())
    }

    fn deployment_base_uri(&self, _build: &Build) -> Option<String> {
        self.base.clone()
    }

    async fn complete_deployment(&self, _build: &mut Build) -> Result<()> {
        *self.completed.lock().unwrap() += 1;
        Ok(())
    }

    async fn decommission(&self, build: &mut Build) -> Result<()> {
        if self.fail_teardown {
            return Err(Error::DeploymentFailed("target unreachable".to_string()));
        }
        self.delete(build).await
    }

    async fn delete(&self, build: &Build) -> Result<()> {
        let mut removed = self.removed.lock().unwrap();
        for file in &build.artifacts {
            removed.push(file.relative_path.clone());
        }
        Ok(())
    }
}

/// Records deletions of intermediate files.
#[derive(Default)]
pub(crate) struct RecordingStore {
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    async fn register(&self, _base: &Path, file: &Path) -> Result<ArtifactRef> {
        Err(Error::Internal(format!("unexpected register of {}", file.display())))
    }

    async fn delete(&self, reference: &ArtifactRef) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push(reference.relative_path.clone());
        Ok(())
    }
}

pub(crate) struct Fixture {
    pub repo: Arc<MemoryBuildRepo>,
    pub state: Arc<MemoryStateStore>,
    pub queues: Arc<MemoryQueueFactory>,
    pub store: Arc<RecordingStore>,
    pub generate: Arc<FakeGenerate>,
    pub deploy: Arc<FakeDeploy>,
    pub lifecycle: BuildLifecycle,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_plugins(FakeGenerate::default(), FakeDeploy::default())
    }

    pub fn with_plugins(generate: FakeGenerate, deploy: FakeDeploy) -> Self {
        Self::build(generate, deploy, MemoryQueueFactory::new())
    }

    pub fn with_delay_queues(generate: FakeGenerate) -> Self {
        Self::build(
            generate,
            FakeDeploy::default(),
            MemoryQueueFactory::with_delay_support(),
        )
    }

    fn build(generate: FakeGenerate, deploy: FakeDeploy, queues: MemoryQueueFactory) -> Self {
        let repo = Arc::new(MemoryBuildRepo::new());
        let state = Arc::new(MemoryStateStore::new());
        let generate = Arc::new(generate);
        let deploy = Arc::new(deploy);

        let mut catalog = StrategyCatalog::new();
        catalog.insert(
            Strategy {
                id: "staging".to_string(),
                label: "Staging".to_string(),
                generate: PluginConfig::new("fake"),
                deploy: PluginConfig::new("fake"),
            },
            Some(generate.clone() as Arc<dyn GeneratePlugin>),
            Some(deploy.clone() as Arc<dyn DeployPlugin>),
        );

        let lifecycle = BuildLifecycle::new(repo.clone(), state.clone(), Arc::new(catalog));
        Self {
            repo,
            state,
            queues: Arc::new(queues),
            store: Arc::new(RecordingStore::default()),
            generate,
            deploy,
            lifecycle,
        }
    }

    pub async fn create(&self, input: NewBuild) -> Build {
        self.repo.create(input).await.unwrap()
    }

    pub fn orchestrator(&self) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            self.lifecycle.clone(),
            self.queues.clone(),
            self.store.clone(),
        )
    }
}
