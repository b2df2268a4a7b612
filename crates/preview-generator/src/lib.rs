//! Static site generation for preview site builds.
//!
//! Provides:
//! - A local artifact store registering generated files
//! - The crawl generate plugin over a pluggable page renderer
//! - A mirror renderer serving pages from a source directory
//! - The relevance graph deciding which entities a build may show

pub mod crawl;
pub mod files;
pub mod relevance;
pub mod render;

pub use crawl::{CRAWL_PLUGIN_ID, CrawlGenerator};
pub use files::{LocalArtifactStore, normalize_copied_path};
pub use relevance::{BuildRelevance, DEFAULT_MAX_DEPTH, RelevanceGraph, Seen, UsageGraph};
pub use render::{EntityVisibility, MirrorRenderer, PageRenderer, RenderedPage};

use preview_core::{GeneratePlugin, PluginRegistry};
use std::path::PathBuf;
use std::sync::Arc;

/// Register the `crawl` generate plugin.
///
/// Every strategy using it writes under `artifacts_root` and checks
/// relevance against `relevance`.
pub fn register_plugins(
    registry: &mut PluginRegistry,
    artifacts_root: PathBuf,
    relevance: Arc<RelevanceGraph>,
) {
    let store = Arc::new(LocalArtifactStore::new());
    registry.register_generate(CRAWL_PLUGIN_ID, move |settings| {
        let generator = CrawlGenerator::from_settings(
            settings,
            artifacts_root.clone(),
            store.clone(),
            relevance.clone(),
        )?;
        Ok(Arc::new(generator) as Arc<dyn GeneratePlugin>)
    });
}
