//! Core domain types and traits for preview site builds.
//!
//! This crate contains:
//! - Build, strategy and content identifiers
//! - The build aggregate and its artifact ledger
//! - Generate and deploy plugin traits plus the plugin registry
//! - Work queue and shared state abstractions
//! - Content relationship seams used by relevance checks

pub mod artifact;
pub mod build;
pub mod content;
pub mod deploy;
pub mod error;
pub mod generate;
pub mod id;
pub mod plugin;
pub mod queue;
pub mod state;
pub mod strategy;

pub use artifact::{ArtifactRef, ArtifactStore, FileCollection};
pub use build::{Build, BuildStatus, NewBuild};
pub use content::{EntityRef, NoParent, ParentResolver, UsageIndex, UsageSource};
pub use deploy::DeployPlugin;
pub use error::{Error, Result};
pub use generate::GeneratePlugin;
pub use id::{BuildId, ResourceId};
pub use plugin::{PluginRegistry, PluginSettings};
pub use queue::{ClaimedItem, QueueFactory, QueueName, QueueStage, WorkItem, WorkQueue};
pub use state::{BUILDING_STATE_KEY, StateStore};
pub use strategy::{PluginConfig, Strategy};
