//! Preview site build CLI.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use preview_core::{BuildId, EntityRef};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod state;

#[derive(Parser)]
#[command(name = "preview")]
#[command(about = "Build, deploy and retire preview sites", long_about = None)]
struct Cli {
    /// Site configuration file
    #[arg(long, env = "PREVIEW_CONFIG", default_value = "preview.kdl", global = true)]
    config: PathBuf,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Validate the site configuration
    Validate,
    /// Create a build
    Create {
        /// Human readable name
        label: String,
        /// Strategy id from the site configuration
        #[arg(long)]
        strategy: String,
        /// Content item to include, as type:id (repeatable, in order)
        #[arg(long = "item", value_name = "TYPE:ID")]
        items: Vec<EntityRef>,
        /// Instant after which the build is swept (RFC 3339)
        #[arg(long)]
        expires: Option<DateTime<Utc>>,
    },
    /// List builds
    List,
    /// Show a build with its log and deployed links
    Show {
        /// Build ID
        id: BuildId,
    },
    /// Generate and deploy a build
    Build {
        /// Build ID
        id: BuildId,
    },
    /// Tear down a build's deployment and retire it
    Decommission {
        /// Build ID
        id: BuildId,
    },
    /// Delete a build and tear down its deployment
    Delete {
        /// Build ID
        id: BuildId,
    },
    /// Decommission expired builds
    Sweep {
        /// Keep sweeping every N seconds
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Show the build holding the building lock
    Running,
    /// Clear a stuck building lock
    ResetLock,
    /// Check whether an entity is visible in a build
    Relevant {
        /// Build ID
        id: BuildId,
        /// Entity as type:id
        entity: EntityRef,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = cli.database_url.as_deref();

    match cli.command {
        Commands::Migrate => {
            commands::migrate(database_url).await?;
        }
        Commands::Validate => {
            commands::validate(&cli.config)?;
        }
        Commands::Create {
            label,
            strategy,
            items,
            expires,
        } => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::builds::create(&app, label, strategy, items, expires).await?;
        }
        Commands::List => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::builds::list(&app).await?;
        }
        Commands::Show { id } => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::builds::show(&app, id).await?;
        }
        Commands::Build { id } => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::build::run(&app, id).await?;
        }
        Commands::Decommission { id } => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::builds::decommission(&app, id).await?;
        }
        Commands::Delete { id } => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::builds::delete(&app, id).await?;
        }
        Commands::Sweep { interval } => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::lock::sweep(&app, interval).await?;
        }
        Commands::Running => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::lock::running(&app).await?;
        }
        Commands::ResetLock => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::lock::reset(&app).await?;
        }
        Commands::Relevant { id, entity } => {
            let app = state::App::connect(&cli.config, database_url).await?;
            commands::builds::relevant(&app, id, &entity).await?;
        }
    }

    Ok(())
}
