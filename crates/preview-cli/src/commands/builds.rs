//! Build record commands.

use crate::state::App;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use preview_core::{BuildId, BuildStatus, EntityRef, NewBuild};
use preview_db::BuildRepo;

pub async fn create(
    app: &App,
    label: String,
    strategy: String,
    items: Vec<EntityRef>,
    expires: Option<DateTime<Utc>>,
) -> Result<()> {
    if app.config.strategy(&strategy).is_none() {
        anyhow::bail!("Unknown strategy: {}", strategy);
    }
    let build = app
        .lifecycle
        .repo()
        .create(NewBuild {
            label,
            strategy,
            contents: items,
            expiry_date: expires,
        })
        .await
        .context("Failed to create build")?;
    println!("Created build {} ({})", build.id, build.uuid);
    Ok(())
}

pub async fn list(app: &App) -> Result<()> {
    let builds = app.lifecycle.repo().list().await?;
    if builds.is_empty() {
        println!("No builds");
        return Ok(());
    }
    println!(
        "{:<6} {:<16} {:<14} {:<12} {:>6} {}",
        "ID", "STATUS", "STRATEGY", "ITEMS", "FILES", "LABEL"
    );
    for build in builds {
        println!(
            "{:<6} {:<16} {:<14} {:<12} {:>6} {}",
            build.id.get(),
            build.status.as_str(),
            build.strategy,
            build.contents.len(),
            build.artifacts.len(),
            build.label
        );
    }
    Ok(())
}

pub async fn show(app: &App, id: BuildId) -> Result<()> {
    let build = app.lifecycle.load(id).await?;

    println!("Build {} ({})", build.id, build.uuid);
    println!("  Label:    {}", build.label);
    println!("  Status:   {}", build.status);
    println!("  Strategy: {}", build.strategy);
    if let Some(expiry) = build.expiry_date {
        println!("  Expires:  {}", expiry.to_rfc3339());
    }
    if let Some(deployed) = build.deployed_at {
        println!("  Deployed: {}", deployed.to_rfc3339());
    }

    println!("\nContents:");
    if build.status == BuildStatus::Built {
        match app.lifecycle.item_links(&build) {
            Ok(links) => {
                for (item, url) in links {
                    println!("  {} -> {}", item, url);
                }
            }
            Err(e) => {
                println!("  (links unavailable: {})", e);
                for item in &build.contents {
                    println!("  {}", item);
                }
            }
        }
    } else {
        for item in &build.contents {
            println!("  {}", item);
        }
    }

    println!("\nArtifacts: {}", build.artifacts.len());
    println!("\nLog:");
    for entry in &build.log {
        println!("  {}", entry);
    }
    Ok(())
}

pub async fn decommission(app: &App, id: BuildId) -> Result<()> {
    let build = app.lifecycle.decommission(id).await?;
    println!("Decommissioned build {} ({})", build.id, build.label);
    Ok(())
}

pub async fn delete(app: &App, id: BuildId) -> Result<()> {
    app.lifecycle.delete(id).await?;
    println!("Deleted build {}", id);
    Ok(())
}

/// Ask the build's generate plugin, falling back to the site relevance graph.
pub async fn relevant(app: &App, id: BuildId, entity: &EntityRef) -> Result<()> {
    let build = app.lifecycle.load(id).await?;
    let generate = app
        .lifecycle
        .strategy_for(&build)
        .and_then(|s| s.generate.clone());
    let relevant = match generate {
        Some(generate) => generate.is_entity_relevant(&build, entity).await?,
        None => app.relevance.is_relevant(&build, entity).await?,
    };
    if relevant {
        println!("{} is visible in build {}", entity, build.id);
    } else {
        println!("{} is not visible in build {}", entity, build.id);
    }
    Ok(())
}
