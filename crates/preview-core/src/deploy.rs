//! Deploy plugin trait.
//!
//! A deploy plugin pushes generated artifacts to a target and removes them
//! again on decommission or delete.

use async_trait::async_trait;

use crate::{ArtifactRef, Build, Result};

#[async_trait]
pub trait DeployPlugin: Send + Sync {
    /// Registry identifier of this plugin.
    fn id(&self) -> &str;

    /// Push one artifact to the target.
    async fn deploy_artifact(&self, build: &Build, file: &ArtifactRef) -> Result<()>;

    /// Base URI the build is served from, if it can be determined.
    fn deployment_base_uri(&self, build: &Build) -> Option<String>;

    /// Called once after the build finished.
    async fn complete_deployment(&self, build: &mut Build) -> Result<()>;

    /// Remove the deployed files of a build that is being decommissioned.
    async fn decommission(&self, build: &mut Build) -> Result<()>;

    /// Remove the deployed files of a build that is being deleted.
    async fn delete(&self, build: &Build) -> Result<()>;

    /// Rewrite a site path into the URL it is served at once deployed.
    fn alter_url_to_deployed_item(&self, url: &str, build: &Build) -> String {
        match self.deployment_base_uri(build) {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            None => url.to_string(),
        }
    }
}
