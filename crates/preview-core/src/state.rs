//! Shared key-value state.

use async_trait::async_trait;

use crate::Result;

/// Key under which the UUID of the build currently generating is kept.
pub const BUILDING_STATE_KEY: &str = "preview_site.building";

/// Trait for process-wide key-value state backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, replacing any existing one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
