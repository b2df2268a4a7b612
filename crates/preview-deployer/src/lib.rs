//! Deployment backends for preview site builds.
//!
//! Provides deploy plugin implementations:
//! - Filesystem (copies artifacts into a served directory)

pub mod filesystem;

pub use filesystem::{FILESYSTEM_PLUGIN_ID, FilesystemDeployer, TeardownStats};

use preview_core::{DeployPlugin, PluginRegistry};
use std::sync::Arc;

/// Register the deploy plugins provided by this crate.
pub fn register_plugins(registry: &mut PluginRegistry) {
    registry.register_deploy(FILESYSTEM_PLUGIN_ID, |settings| {
        Ok(Arc::new(FilesystemDeployer::from_settings(settings)?) as Arc<dyn DeployPlugin>)
    });
}
