//! Crawl generate plugin.
//!
//! Renders each content item's page, copies the static files it references
//! and queues the remaining assets for the asset stage. Links to other pages
//! are not followed.

use async_trait::async_trait;
use preview_config::VariableContextBuilder;
use preview_core::{
    ArtifactStore, Build, EntityRef, Error, FileCollection, GeneratePlugin, PluginSettings,
    Result, WorkItem, WorkQueue,
};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info, warn};

use crate::files::normalize_copied_path;
use crate::relevance::RelevanceGraph;
use crate::render::{MirrorRenderer, PageRenderer};

pub const CRAWL_PLUGIN_ID: &str = "crawl";

const DEFAULT_ITEM_PATH: &str = "/${entity.type}/${entity.id}";

static OEMBED_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/media/oembed\?").unwrap());

pub struct CrawlGenerator {
    renderer: Arc<dyn PageRenderer>,
    store: Arc<dyn ArtifactStore>,
    relevance: Arc<RelevanceGraph>,
    artifacts_root: PathBuf,
    item_path: String,
}

impl CrawlGenerator {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        store: Arc<dyn ArtifactStore>,
        relevance: Arc<RelevanceGraph>,
        artifacts_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            renderer,
            store,
            relevance,
            artifacts_root: artifacts_root.into(),
            item_path: DEFAULT_ITEM_PATH.to_string(),
        }
    }

    /// Build from strategy settings: `source-root` (required) and
    /// `item-path` (a template over `${entity.type}` and `${entity.id}`).
    /// The renderer uses the item path to recognise entity pages.
    pub fn from_settings(
        settings: &PluginSettings,
        artifacts_root: PathBuf,
        store: Arc<dyn ArtifactStore>,
        relevance: Arc<RelevanceGraph>,
    ) -> Result<Self> {
        let source_root = settings.get("source-root").ok_or_else(|| {
            Error::Plugin("crawl generator requires a source-root setting".to_string())
        })?;
        let item_path = settings
            .get("item-path")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ITEM_PATH.to_string());
        let renderer = Arc::new(MirrorRenderer::new(source_root).with_entity_paths(&item_path)?);
        Ok(Self::new(renderer, store, relevance, artifacts_root).with_item_path(item_path))
    }

    pub fn with_item_path(mut self, template: impl Into<String>) -> Self {
        self.item_path = template.into();
        self
    }

    /// Pages are not crawled: only assets and oEmbed responses are queued.
    fn is_terminal_page(&self, path: &str) -> bool {
        self.renderer.destination_for(path).ends_with("/index.html") && !OEMBED_REGEX.is_match(path)
    }

    fn fail(build: &mut Build, entry: String) {
        error!(build_id = %build.id, "{}", entry);
        build.add_log_entry(entry);
        build.mark_failed();
    }

    async fn collect_files(
        &self,
        build: &mut Build,
        base: &Path,
        destination: &Path,
        copied_files: Vec<String>,
    ) -> Result<FileCollection> {
        let mut collection = FileCollection::new();
        collection.add_file(self.store.register(base, destination).await?);

        let mut seen = Vec::new();
        for copied in copied_files {
            if seen.contains(&copied) {
                continue;
            }
            seen.push(copied.clone());
            let copied = normalize_copied_path(&copied);
            if build.has_path_been_processed(&copied) {
                continue;
            }
            build.mark_path_processed(&copied);
            collection.add_file(self.store.register(base, Path::new(&copied)).await?);
        }
        Ok(collection)
    }
}

#[async_trait]
impl GeneratePlugin for CrawlGenerator {
    fn id(&self) -> &str {
        CRAWL_PLUGIN_ID
    }

    async fn prepare_build(&self, build: &mut Build, base_url: Option<&str>) -> Result<()> {
        let base = self.artifact_base_path(build);
        if tokio::fs::try_exists(&base).await? {
            tokio::fs::remove_dir_all(&base).await?;
        }
        tokio::fs::create_dir_all(&base).await?;
        info!(
            build_id = %build.id,
            path = %base.display(),
            base_url = base_url.unwrap_or("-"),
            "Prepared artifact directory"
        );
        Ok(())
    }

    async fn complete_build(&self, build: &mut Build) -> Result<()> {
        info!(
            build_id = %build.id,
            artifacts = build.artifacts.len(),
            processed = build.processed_paths.len(),
            "Generation complete"
        );
        Ok(())
    }

    async fn generate_for_item(
        &self,
        build: &mut Build,
        item: &EntityRef,
        base_url: &str,
        asset_queue: &dyn WorkQueue,
    ) -> Result<FileCollection> {
        let path = self.item_path(build, item);
        self.generate_for_path(build, &path, base_url, asset_queue)
            .await
    }

    async fn generate_for_path(
        &self,
        build: &mut Build,
        path: &str,
        base_url: &str,
        asset_queue: &dyn WorkQueue,
    ) -> Result<FileCollection> {
        if build.has_path_been_processed(path) {
            debug!(build_id = %build.id, path = %path, "Path already processed");
            return Ok(FileCollection::new());
        }
        build.mark_path_processed(path);

        let base = self.artifact_base_path(build);
        let rendered = {
            let visibility = self.relevance.for_build(build);
            self.renderer.render(path, base_url, &base, &visibility).await
        };
        let page = match rendered {
            Ok(page) => page,
            Err(e) => {
                Self::fail(
                    build,
                    format!("ERROR: Exception caught when requesting path {}: {}", path, e),
                );
                return Ok(FileCollection::new());
            }
        };

        let Some(destination) = page.destination else {
            let entry = format!(
                "WARNING: The anonymous user does not have access to view the latest revision for {}: skipped.",
                path
            );
            warn!(build_id = %build.id, path = %path, "Nothing rendered for path");
            build.add_log_entry(entry);
            return Ok(FileCollection::new());
        };

        for asset in page.discovered_paths {
            if self.is_terminal_page(&asset) {
                continue;
            }
            if !build.has_path_been_processed(&asset) {
                asset_queue.enqueue(WorkItem::Path(asset)).await?;
            }
        }

        match self
            .collect_files(build, &base, &destination, page.copied_files)
            .await
        {
            Ok(collection) => Ok(collection),
            Err(Error::CouldNotWriteFile(message)) => {
                Self::fail(
                    build,
                    format!(
                        "ERROR: Exception caught when attempting to create file from {}: {}",
                        path, message
                    ),
                );
                Ok(FileCollection::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn is_entity_relevant(&self, build: &Build, entity: &EntityRef) -> Result<bool> {
        self.relevance.is_relevant(build, entity).await
    }

    fn artifact_base_path(&self, build: &Build) -> PathBuf {
        self.artifacts_root.join(build.uuid.to_string())
    }

    fn item_path(&self, build: &Build, item: &EntityRef) -> String {
        VariableContextBuilder::new()
            .with_build(build)
            .with_entity(item)
            .build()
            .interpolate(&self.item_path)
    }

    fn alter_url_to_deployed_item(&self, url: &str, _build: &Build) -> String {
        format!("{}/index.html", url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::LocalArtifactStore;
    use crate::relevance::UsageGraph;
    use crate::render::{EntityVisibility, RenderedPage};
    use preview_core::{BuildId, BuildStatus, NewBuild};
    use preview_db::MemoryWorkQueue;
    use std::sync::Mutex;

    const BASE_URL: &str = "https://preview.test";

    /// Renderer returning canned pages and counting calls.
    struct ScriptedRenderer {
        pages: Mutex<Vec<(String, Result<RenderedPage>)>>,
        calls: Mutex<Vec<String>>,
        files: Vec<(String, String)>,
    }

    impl ScriptedRenderer {
        fn new() -> Self {
            Self {
                pages: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                files: Vec::new(),
            }
        }

        fn page(self, path: &str, page: Result<RenderedPage>) -> Self {
            self.pages.lock().unwrap().push((path.to_string(), page));
            self
        }

        /// Write `relative` under the output directory when rendering.
        fn writes(mut self, relative: &str, content: &str) -> Self {
            self.files.push((relative.to_string(), content.to_string()));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageRenderer for ScriptedRenderer {
        async fn render(
            &self,
            path: &str,
            _base_url: &str,
            output_dir: &Path,
            _visibility: &dyn EntityVisibility,
        ) -> Result<RenderedPage> {
            self.calls.lock().unwrap().push(path.to_string());
            for (relative, content) in &self.files {
                let target = output_dir.join(relative);
                std::fs::create_dir_all(target.parent().unwrap()).unwrap();
                std::fs::write(target, content).unwrap();
            }
            let mut pages = self.pages.lock().unwrap();
            let index = pages.iter().position(|(p, _)| p == path).unwrap();
            let (_, page) = pages.remove(index);
            page.map(|mut page| {
                page.destination = page.destination.map(|d| output_dir.join(d));
                page.copied_files = page
                    .copied_files
                    .into_iter()
                    .map(|c| format!("{}/{}", output_dir.display(), c))
                    .collect();
                page
            })
        }

        fn destination_for(&self, path: &str) -> String {
            if path.rsplit('/').next().unwrap_or("").contains('.') {
                path.to_string()
            } else {
                format!("{}/index.html", path.split('?').next().unwrap())
            }
        }
    }

    fn build() -> Build {
        let mut build = Build::new(
            BuildId::new(1),
            NewBuild {
                label: "b".to_string(),
                strategy: "staging".to_string(),
                contents: vec![EntityRef::new("node", "1")],
                expiry_date: None,
            },
        );
        build.begin_attempt();
        build
    }

    fn generator(renderer: Arc<ScriptedRenderer>, root: &Path) -> CrawlGenerator {
        CrawlGenerator::new(
            renderer,
            Arc::new(LocalArtifactStore::new()),
            Arc::new(RelevanceGraph::new(Arc::new(UsageGraph::default()))),
            root,
        )
    }

    fn page(destination: &str, discovered: &[&str], copied: &[&str]) -> RenderedPage {
        RenderedPage {
            destination: Some(PathBuf::from(destination)),
            discovered_paths: discovered.iter().map(|s| s.to_string()).collect(),
            copied_files: copied.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn drain(queue: &MemoryWorkQueue) -> Vec<WorkItem> {
        let mut items = Vec::new();
        while let Some(claimed) = queue.claim_one().await.unwrap() {
            items.push(claimed.item.clone());
            queue.delete_claimed(&claimed).await.unwrap();
        }
        items
    }

    #[tokio::test]
    async fn test_generate_for_path_registers_files_and_queues_assets() {
        let root = tempfile::tempdir().unwrap();
        let renderer = Arc::new(
            ScriptedRenderer::new()
                .page(
                    "/node/1",
                    Ok(page(
                        "node/1/index.html",
                        &["/node/2", "/img/a.png", "/media/oembed?url=x"],
                        &["css/./site.css", "css/./site.css"],
                    )),
                )
                .writes("node/1/index.html", "<html></html>")
                .writes("css/site.css", "body{}"),
        );
        let generator = generator(renderer.clone(), root.path());
        let mut build = build();
        generator.prepare_build(&mut build, Some(BASE_URL)).await.unwrap();
        let queue = MemoryWorkQueue::new(false);

        let files = generator
            .generate_for_path(&mut build, "/node/1", BASE_URL, &queue)
            .await
            .unwrap();

        let relative: Vec<_> = files.iter().map(|f| f.relative_path.clone()).collect();
        assert_eq!(relative, vec!["node/1/index.html", "css/site.css"]);
        assert_eq!(
            drain(&queue).await,
            vec![
                WorkItem::Path("/img/a.png".to_string()),
                WorkItem::Path("/media/oembed?url=x".to_string()),
            ]
        );
        assert!(build.has_path_been_processed("/node/1"));
        let base = generator.artifact_base_path(&build);
        assert!(build.has_path_been_processed(&format!("{}/css/site.css", base.display())));
        assert_eq!(build.status, BuildStatus::Building);
    }

    #[tokio::test]
    async fn test_second_generate_for_same_path_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let renderer = Arc::new(
            ScriptedRenderer::new()
                .page("/node/1", Ok(page("node/1/index.html", &["/img/a.png"], &[])))
                .writes("node/1/index.html", "<html></html>"),
        );
        let generator = generator(renderer.clone(), root.path());
        let mut build = build();
        generator.prepare_build(&mut build, None).await.unwrap();
        let queue = MemoryWorkQueue::new(false);

        let first = generator
            .generate_for_path(&mut build, "/node/1", BASE_URL, &queue)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(queue.count().await.unwrap(), 1);

        let second = generator
            .generate_for_path(&mut build, "/node/1", BASE_URL, &queue)
            .await
            .unwrap();
        assert!(second.is_empty());
        assert_eq!(queue.count().await.unwrap(), 1);
        assert_eq!(renderer.calls(), vec!["/node/1".to_string()]);
    }

    #[tokio::test]
    async fn test_processed_assets_are_not_queued_again() {
        let root = tempfile::tempdir().unwrap();
        let renderer = Arc::new(
            ScriptedRenderer::new()
                .page("/node/1", Ok(page("node/1/index.html", &["/img/a.png"], &[])))
                .writes("node/1/index.html", "<html></html>"),
        );
        let generator = generator(renderer, root.path());
        let mut build = build();
        build.mark_path_processed("/img/a.png");
        let queue = MemoryWorkQueue::new(false);

        generator
            .generate_for_path(&mut build, "/node/1", BASE_URL, &queue)
            .await
            .unwrap();
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_render_failure_marks_build_failed() {
        let root = tempfile::tempdir().unwrap();
        let renderer = Arc::new(ScriptedRenderer::new().page(
            "/node/1",
            Err(Error::RenderFailed {
                path: "/node/1".to_string(),
                message: "template exploded".to_string(),
            }),
        ));
        let generator = generator(renderer, root.path());
        let mut build = build();
        let queue = MemoryWorkQueue::new(false);

        let files = generator
            .generate_for_path(&mut build, "/node/1", BASE_URL, &queue)
            .await
            .unwrap();

        assert!(files.is_empty());
        assert_eq!(build.status, BuildStatus::Failed);
        assert!(build.log.iter().any(|entry| entry.starts_with("ERROR:")
            && entry.contains("/node/1")
            && entry.contains("template exploded")));
        assert!(build.has_path_been_processed("/node/1"));
    }

    #[tokio::test]
    async fn test_missing_output_file_marks_build_failed() {
        let root = tempfile::tempdir().unwrap();
        let renderer = Arc::new(
            ScriptedRenderer::new().page("/node/1", Ok(page("node/1/index.html", &[], &[]))),
        );
        let generator = generator(renderer, root.path());
        let mut build = build();
        let queue = MemoryWorkQueue::new(false);

        let files = generator
            .generate_for_path(&mut build, "/node/1", BASE_URL, &queue)
            .await
            .unwrap();

        assert!(files.is_empty());
        assert!(build.is_failed());
        assert!(build.log.iter().any(|entry| entry
            .starts_with("ERROR: Exception caught when attempting to create file from /node/1")));
    }

    #[tokio::test]
    async fn test_nothing_rendered_logs_warning() {
        let root = tempfile::tempdir().unwrap();
        let renderer =
            Arc::new(ScriptedRenderer::new().page("/node/1", Ok(RenderedPage::default())));
        let generator = generator(renderer, root.path());
        let mut build = build();
        let queue = MemoryWorkQueue::new(false);

        let files = generator
            .generate_for_path(&mut build, "/node/1", BASE_URL, &queue)
            .await
            .unwrap();

        assert!(files.is_empty());
        assert_eq!(build.status, BuildStatus::Building);
        assert!(build.log.last().unwrap().starts_with("WARNING:"));
    }

    #[tokio::test]
    async fn test_item_path_and_deployed_url() {
        let root = tempfile::tempdir().unwrap();
        let generator = generator(Arc::new(ScriptedRenderer::new()), root.path())
            .with_item_path("/content/${entity.type}-${entity.id}");
        let build = build();
        let path = generator.item_path(&build, &EntityRef::new("node", "9"));
        assert_eq!(path, "/content/node-9");
        assert_eq!(
            generator.alter_url_to_deployed_item(&path, &build),
            "/content/node-9/index.html"
        );
        assert_eq!(
            generator.artifact_base_path(&build),
            root.path().join(build.uuid.to_string())
        );
    }

    #[tokio::test]
    async fn test_prepare_build_clears_previous_output() {
        let root = tempfile::tempdir().unwrap();
        let generator = generator(Arc::new(ScriptedRenderer::new()), root.path());
        let mut build = build();
        let base = generator.artifact_base_path(&build);
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(base.join("stale.html"), "old").unwrap();

        generator.prepare_build(&mut build, None).await.unwrap();
        assert!(base.is_dir());
        assert!(!base.join("stale.html").exists());
    }

    #[test]
    fn test_from_settings_requires_source_root() {
        let settings = PluginSettings::new();
        let result = CrawlGenerator::from_settings(
            &settings,
            PathBuf::from("/tmp"),
            Arc::new(LocalArtifactStore::new()),
            Arc::new(RelevanceGraph::new(Arc::new(UsageGraph::default()))),
        );
        assert!(matches!(result.err().unwrap(), Error::Plugin(_)));
    }

    #[tokio::test]
    async fn test_irrelevant_entity_page_is_not_generated() {
        let source = tempfile::tempdir().unwrap();
        for (page, body) in [
            ("node/1", r#"<a href="/media/7">photo</a><a href="/node/3">other</a>"#),
            ("media/7", "<img src=\"/img/7.png\">"),
            ("node/3", "<p>draft</p>"),
        ] {
            std::fs::create_dir_all(source.path().join(page)).unwrap();
            std::fs::write(source.path().join(page).join("index.html"), body).unwrap();
        }
        let mut usage = UsageGraph::new();
        usage.add_reference(EntityRef::new("node", "1"), EntityRef::new("media", "7"));
        let root = tempfile::tempdir().unwrap();
        let mut settings = PluginSettings::new();
        settings.insert(
            "source-root".to_string(),
            source.path().to_string_lossy().into_owned(),
        );
        let generator = CrawlGenerator::from_settings(
            &settings,
            root.path().to_path_buf(),
            Arc::new(LocalArtifactStore::new()),
            Arc::new(RelevanceGraph::from_usage_graph(usage)),
        )
        .unwrap();
        let mut build = build();
        generator.prepare_build(&mut build, Some(BASE_URL)).await.unwrap();
        let queue = MemoryWorkQueue::new(false);
        let base = generator.artifact_base_path(&build);

        let hidden = generator
            .generate_for_path(&mut build, "/node/3", BASE_URL, &queue)
            .await
            .unwrap();
        assert!(hidden.is_empty());
        assert!(!base.join("node/3").exists());
        assert!(build.log.last().unwrap().starts_with("WARNING:"));
        assert!(!build.is_failed());

        let media = generator
            .generate_for_path(&mut build, "/media/7", BASE_URL, &queue)
            .await
            .unwrap();
        assert_eq!(media.len(), 1);
        assert!(base.join("media/7/index.html").is_file());
        assert_eq!(
            drain(&queue).await,
            vec![WorkItem::Path("/img/7.png".to_string())]
        );
    }
}
