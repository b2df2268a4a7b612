//! Error types for preview site builds.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another build holds the building lock. Carries the holder's UUID.
    #[error(
        "preview site ID {0} is currently being built, only one site can be built at a time"
    )]
    GenerationInProgress(String),

    #[error("could not write file: {0}")]
    CouldNotWriteFile(String),

    #[error("failed to render {path}: {message}")]
    RenderFailed { path: String, message: String },

    #[error("deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("plugin error: {0}")]
    Plugin(String),

    /// Raised by a queue worker to put its item straight back on the queue.
    #[error("retry requested")]
    RetryRequested,

    /// Raised by a queue worker to put its item back after a delay.
    #[error("retry requested after {delay:?}")]
    DelayRequested { delay: Duration },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
