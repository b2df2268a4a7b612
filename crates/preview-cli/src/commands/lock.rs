//! Building lock and expiry commands.

use crate::state::App;
use anyhow::Result;
use preview_scheduler::Sweeper;
use std::time::Duration;

pub async fn running(app: &App) -> Result<()> {
    match app.lifecycle.running_build().await? {
        Some(build) => println!(
            "Build {} ({}) is being built, lock held by {}",
            build.id, build.label, build.uuid
        ),
        None => match app.lifecycle.lock_holder().await? {
            Some(holder) => println!("Lock held by unknown build {}", holder),
            None => println!("No build is running"),
        },
    }
    Ok(())
}

pub async fn reset(app: &App) -> Result<()> {
    match app.lifecycle.force_reset().await? {
        Some(holder) => println!("Released lock held by {}", holder),
        None => println!("Lock was not held"),
    }
    Ok(())
}

pub async fn sweep(app: &App, interval: Option<u64>) -> Result<()> {
    match interval {
        Some(secs) => {
            Sweeper::new(app.lifecycle.clone(), Duration::from_secs(secs))
                .run()
                .await;
            Ok(())
        }
        None => {
            let swept = app.lifecycle.sweep_expired(chrono::Utc::now()).await?;
            println!("Decommissioned {} expired builds", swept.len());
            Ok(())
        }
    }
}
