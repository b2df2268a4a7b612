//! Run a build through generation and deployment.

use crate::state::App;
use anyhow::{Context, Result};
use preview_core::BuildId;
use preview_scheduler::BuildEvent;

pub async fn run(app: &App, id: BuildId) -> Result<()> {
    let build = app.lifecycle.load(id).await?;
    println!("Building preview site: {} ({})", build.label, build.id);
    println!("Content items: {}", build.contents.len());
    println!("\n--- Starting build ---\n");

    let (mut rx, result_handle) = app.orchestrator.execute(id);

    while let Some(event) = rx.recv().await {
        match event {
            BuildEvent::StageStarted { step } => {
                println!("▶ Step '{}' started", step);
            }
            BuildEvent::Progress {
                step,
                finished,
                message,
            } => {
                println!("  [{}] {:>3.0}% {}", step, finished * 100.0, message);
            }
            BuildEvent::StageCompleted { step, success } => {
                if success {
                    println!("✓ Step '{}' completed\n", step);
                } else {
                    println!("✗ Step '{}' failed\n", step);
                }
            }
            BuildEvent::BuildCompleted { success } => {
                if success {
                    println!("--- Build completed ---");
                } else {
                    println!("--- Build failed ---");
                }
            }
        }
    }

    let report = result_handle
        .await
        .context("Build task failed")?
        .context("The preview site was unable to be generated and deployed")?;

    if report.generate_errors {
        anyhow::bail!("The preview site was not able to be built, preview generation failed.");
    }
    println!(
        "\n✓ The preview site was successfully built, {} previews were generated and {} artifacts were deployed.",
        report.generated, report.deployed
    );
    Ok(())
}
