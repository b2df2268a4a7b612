//! Generate plugin trait.
//!
//! A generate plugin turns build contents into files under the build's
//! artifact base path and decides which entities a build may show.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::{Build, EntityRef, FileCollection, Result, WorkQueue};

#[async_trait]
pub trait GeneratePlugin: Send + Sync {
    /// Registry identifier of this plugin.
    fn id(&self) -> &str;

    /// Prepare storage for a new attempt. `base_url` is the deployment base
    /// URI when the deploy plugin knows it.
    async fn prepare_build(&self, build: &mut Build, base_url: Option<&str>) -> Result<()>;

    /// Called once every generate and asset item has been processed.
    async fn complete_build(&self, build: &mut Build) -> Result<()>;

    /// Generate the files for one content item.
    ///
    /// Discovered assets are pushed onto `asset_queue`. Failures worth
    /// recording go to the build ledger; the caller persists the build.
    async fn generate_for_item(
        &self,
        build: &mut Build,
        item: &EntityRef,
        base_url: &str,
        asset_queue: &dyn WorkQueue,
    ) -> Result<FileCollection>;

    /// Generate the files for one site path. A path already processed in this
    /// attempt yields an empty collection.
    async fn generate_for_path(
        &self,
        build: &mut Build,
        path: &str,
        base_url: &str,
        asset_queue: &dyn WorkQueue,
    ) -> Result<FileCollection>;

    /// Whether `entity` may be shown inside `build`.
    async fn is_entity_relevant(&self, build: &Build, entity: &EntityRef) -> Result<bool>;

    /// Directory under which this build's files are written.
    fn artifact_base_path(&self, build: &Build) -> PathBuf;

    /// Site path generated for a content item.
    fn item_path(&self, build: &Build, item: &EntityRef) -> String;

    fn alter_url_to_deployed_item(&self, url: &str, _build: &Build) -> String {
        url.to_string()
    }
}
