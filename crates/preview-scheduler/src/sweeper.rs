//! Periodic decommissioning of expired builds.

use crate::lifecycle::BuildLifecycle;
use chrono::Utc;
use preview_core::{BuildId, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Decommissions expired builds on a fixed interval.
pub struct Sweeper {
    lifecycle: BuildLifecycle,
    interval: Duration,
}

impl Sweeper {
    pub fn new(lifecycle: BuildLifecycle, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
        }
    }

    pub async fn sweep_once(&self) -> Result<Vec<BuildId>> {
        self.lifecycle.sweep_expired(Utc::now()).await
    }

    /// Run the sweep loop.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "Starting expiry sweeper");

        loop {
            match self.sweep_once().await {
                Ok(swept) if !swept.is_empty() => {
                    info!(count = swept.len(), "Decommissioned expired builds");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to sweep expired builds");
                }
            }
            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, new_build};
    use preview_core::BuildStatus;

    #[tokio::test]
    async fn test_sweep_once() {
        let fx = Fixture::new();
        let mut input = new_build("expired");
        input.expiry_date = Some(Utc::now() - chrono::Duration::hours(1));
        let build = fx.create(input).await;
        let mut input = new_build("open-ended");
        input.expiry_date = None;
        fx.create(input).await;

        let sweeper = Sweeper::new(fx.lifecycle.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.sweep_once().await.unwrap(), vec![build.id]);

        let build = fx.lifecycle.load(build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Decommissioned);
        assert_eq!(
            fx.deploy.removed.lock().unwrap().len(),
            0,
            "no artifacts were ever deployed"
        );
    }
}
