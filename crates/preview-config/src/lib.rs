//! KDL configuration parsing for preview site builds.
//!
//! This crate handles parsing of:
//! - Site configuration (preview.kdl)
//! - Strategy definitions
//! - Variable interpolation in plugin settings

pub mod error;
pub mod site;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use site::{SiteConfig, load_site_config, parse_site_config};
pub use variables::{BuildContext, EntityContext, VariableContext, VariableContextBuilder};
