//! Build state machine and the global building lock.

use crate::strategies::{ResolvedStrategy, StrategyCatalog};
use chrono::{DateTime, Utc};
use preview_core::{
    ArtifactRef, BUILDING_STATE_KEY, Build, BuildId, BuildStatus, EntityRef, Error, ResourceId,
    Result, StateStore,
};
use preview_db::{BuildRepo, DbError};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Moves builds between statuses and owns the building lock.
///
/// The lock is a single key in the [`StateStore`] holding the UUID of the
/// build currently being generated.
#[derive(Clone)]
pub struct BuildLifecycle {
    repo: Arc<dyn BuildRepo>,
    state: Arc<dyn StateStore>,
    strategies: Arc<StrategyCatalog>,
}

impl BuildLifecycle {
    pub fn new(
        repo: Arc<dyn BuildRepo>,
        state: Arc<dyn StateStore>,
        strategies: Arc<StrategyCatalog>,
    ) -> Self {
        Self {
            repo,
            state,
            strategies,
        }
    }

    pub fn repo(&self) -> &Arc<dyn BuildRepo> {
        &self.repo
    }

    pub fn strategies(&self) -> &Arc<StrategyCatalog> {
        &self.strategies
    }

    pub async fn load(&self, id: BuildId) -> Result<Build> {
        Ok(self.repo.get(id).await?)
    }

    pub async fn save(&self, build: &mut Build) -> Result<()> {
        Ok(self.repo.save(build).await?)
    }

    pub fn strategy_for(&self, build: &Build) -> Option<Arc<ResolvedStrategy>> {
        self.strategies.get(&build.strategy)
    }

    /// UUID of the build holding the lock.
    pub async fn lock_holder(&self) -> Result<Option<String>> {
        self.state.get(BUILDING_STATE_KEY).await
    }

    pub async fn holds_lock(&self, build: &Build) -> Result<bool> {
        Ok(self.lock_holder().await?.as_deref() == Some(build.uuid.to_string().as_str()))
    }

    /// Take the lock and reset the build for a new attempt.
    ///
    /// Fails with [`Error::GenerationInProgress`] while any build, this one
    /// included, holds the lock, and with [`Error::InvalidInput`] for a
    /// decommissioned build. Returns the artifacts of the previous attempt.
    pub async fn start_deployment(&self, id: BuildId) -> Result<Vec<ArtifactRef>> {
        let mut build = self.load(id).await?;
        if build.is_decommissioned() {
            return Err(Error::InvalidInput(format!(
                "preview site build {} has been decommissioned and cannot be rebuilt",
                build.id
            )));
        }
        if let Some(holder) = self.lock_holder().await? {
            return Err(Error::GenerationInProgress(holder));
        }

        let previous = build.begin_attempt();
        self.save(&mut build).await?;
        self.state
            .set(BUILDING_STATE_KEY, &build.uuid.to_string())
            .await?;
        info!(build_id = %build.id, uuid = %build.uuid, "Build lock taken");

        let Some(strategy) = self.strategy_for(&build) else {
            return Ok(previous);
        };
        if let Some(generate) = &strategy.generate {
            let base_url = strategy
                .deploy
                .as_ref()
                .and_then(|deploy| deploy.deployment_base_uri(&build));
            if let Err(e) = generate.prepare_build(&mut build, base_url.as_deref()).await {
                error!(build_id = %build.id, error = %e, "Failed to prepare build");
                self.deployment_failed(&mut build, true).await?;
                return Err(e);
            }
            self.save(&mut build).await?;
        }
        Ok(previous)
    }

    /// End the attempt and release the lock.
    ///
    /// A failure recorded during the run keeps the build `Failed`.
    pub async fn finish_deployment(&self, id: BuildId) -> Result<Build> {
        let mut build = self.load(id).await?;
        build.complete_attempt(Utc::now());
        self.state.delete(BUILDING_STATE_KEY).await?;
        self.save(&mut build).await?;
        info!(build_id = %build.id, status = %build.status, "Build lock released");

        if let Some(deploy) = self.strategy_for(&build).and_then(|s| s.deploy.clone()) {
            deploy.complete_deployment(&mut build).await?;
            self.save(&mut build).await?;
        }
        Ok(build)
    }

    /// Mark `build` failed, releasing the lock only when `reset_lock` is set.
    pub async fn deployment_failed(&self, build: &mut Build, reset_lock: bool) -> Result<()> {
        build.mark_failed();
        if reset_lock {
            self.state.delete(BUILDING_STATE_KEY).await?;
        }
        self.save(build).await?;
        warn!(build_id = %build.id, reset_lock, "Deployment failed");
        Ok(())
    }

    /// Tear down the deployment and retire the build.
    ///
    /// A build that is being generated is refused with
    /// [`Error::InvalidInput`]. Teardown errors are logged; the build is
    /// decommissioned regardless.
    pub async fn decommission(&self, id: BuildId) -> Result<Build> {
        let mut build = self.load(id).await?;
        if build.status == BuildStatus::Building || self.holds_lock(&build).await? {
            return Err(Error::InvalidInput(format!(
                "preview site build {} is currently being built and cannot be decommissioned",
                build.id
            )));
        }
        if let Some(deploy) = self.strategy_for(&build).and_then(|s| s.deploy.clone()) {
            if let Err(e) = deploy.decommission(&mut build).await {
                error!(build_id = %build.id, error = %e, "Failed to tear down deployment");
                build.add_log_entry(format!("ERROR: Failed to tear down deployment: {}", e));
            }
        }
        build.mark_decommissioned();
        self.save(&mut build).await?;
        info!(build_id = %build.id, "Decommissioned build");
        Ok(build)
    }

    /// Remove the build record and tear down its deployment.
    pub async fn delete(&self, id: BuildId) -> Result<()> {
        let build = self.load(id).await?;
        self.repo.delete(id).await?;
        if let Some(deploy) = self.strategy_for(&build).and_then(|s| s.deploy.clone()) {
            if let Err(e) = deploy.delete(&build).await {
                error!(build_id = %build.id, error = %e, "Failed to tear down deployment");
            }
        }
        info!(build_id = %id, "Deleted build");
        Ok(())
    }

    /// The build holding the lock, if it still exists.
    pub async fn running_build(&self) -> Result<Option<Build>> {
        let Some(holder) = self.lock_holder().await? else {
            return Ok(None);
        };
        let uuid: ResourceId = holder
            .parse()
            .map_err(|e| Error::Internal(format!("invalid lock holder '{}': {}", holder, e)))?;
        match self.repo.get_by_uuid(uuid).await {
            Ok(build) => Ok(Some(build)),
            Err(DbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Clear the lock whoever holds it. Returns the previous holder.
    pub async fn force_reset(&self) -> Result<Option<String>> {
        let holder = self.lock_holder().await?;
        match &holder {
            Some(uuid) => warn!(holder = %uuid, "Force releasing build lock"),
            None => info!("Build lock was not held"),
        }
        self.state.delete(BUILDING_STATE_KEY).await?;
        Ok(holder)
    }

    /// Decommission every build past its expiry date.
    ///
    /// A failing build is logged and skipped. Returns the ids decommissioned.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<BuildId>> {
        let mut swept = Vec::new();
        for build in self.repo.list_expired(now).await? {
            match self.decommission(build.id).await {
                Ok(_) => swept.push(build.id),
                Err(e) => {
                    error!(build_id = %build.id, error = %e, "Failed to decommission expired build");
                }
            }
        }
        Ok(swept)
    }

    /// Deployed URL of each content item.
    pub fn item_links(&self, build: &Build) -> Result<Vec<(EntityRef, String)>> {
        let strategy = self
            .strategy_for(build)
            .ok_or_else(|| Error::NotFound(format!("strategy '{}'", build.strategy)))?;
        let generate = strategy.generate.as_ref().ok_or_else(|| {
            Error::NotFound(format!(
                "generate plugin '{}'",
                strategy.strategy.generate.plugin
            ))
        })?;

        Ok(build
            .contents
            .iter()
            .map(|item| {
                let path = generate.item_path(build, item);
                let url = generate.alter_url_to_deployed_item(&path, build);
                let url = match &strategy.deploy {
                    Some(deploy) => deploy.alter_url_to_deployed_item(&url, build),
                    None => url,
                };
                (item.clone(), url)
            })
            .collect())
    }
}

impl std::fmt::Debug for BuildLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildLifecycle")
            .field("strategies", &self.strategies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, new_build};
    use chrono::Duration;

    #[tokio::test]
    async fn test_lock_exclusivity() {
        let fx = Fixture::new();
        let a = fx.create(new_build("a")).await;
        let b = fx.create(new_build("b")).await;

        fx.lifecycle.start_deployment(a.id).await.unwrap();
        let err = fx.lifecycle.start_deployment(b.id).await.unwrap_err();
        assert!(matches!(err, Error::GenerationInProgress(ref holder) if *holder == a.uuid.to_string()));
        assert_eq!(
            fx.lifecycle.lock_holder().await.unwrap(),
            Some(a.uuid.to_string())
        );
        assert_eq!(fx.lifecycle.load(b.id).await.unwrap().status, BuildStatus::Pending);

        // The holder cannot restart itself either.
        assert!(matches!(
            fx.lifecycle.start_deployment(a.id).await.unwrap_err(),
            Error::GenerationInProgress(_)
        ));

        fx.lifecycle.finish_deployment(a.id).await.unwrap();
        fx.lifecycle.start_deployment(b.id).await.unwrap();
        assert_eq!(
            fx.lifecycle.lock_holder().await.unwrap(),
            Some(b.uuid.to_string())
        );
    }

    #[tokio::test]
    async fn test_start_resets_ledger() {
        let fx = Fixture::new();
        let mut build = fx.create(new_build("a")).await;
        build.add_artifact(crate::testing::artifact("old.html"));
        build.mark_path_processed("/old");
        fx.lifecycle.save(&mut build).await.unwrap();

        let previous = fx.lifecycle.start_deployment(build.id).await.unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].relative_path, "old.html");

        let build = fx.lifecycle.load(build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Building);
        assert!(build.artifacts.is_empty());
        assert!(build.processed_paths.is_empty());
        assert_eq!(build.log, vec!["Starting deployment".to_string()]);
        assert_eq!(
            fx.generate.prepared.lock().unwrap().clone(),
            vec![Some("https://preview.test/site/".to_string())]
        );
    }

    #[tokio::test]
    async fn test_prepare_failure_releases_lock() {
        let fx = Fixture::with_plugins(
            crate::testing::FakeGenerate::default().failing_prepare(),
            crate::testing::FakeDeploy::default(),
        );
        let build = fx.create(new_build("a")).await;

        assert!(fx.lifecycle.start_deployment(build.id).await.is_err());
        let build = fx.lifecycle.load(build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Failed);
        assert_eq!(build.log.last().unwrap(), "Deployment failed");
        assert!(fx.lifecycle.lock_holder().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finish_keeps_failure() {
        let fx = Fixture::new();
        let build = fx.create(new_build("a")).await;
        fx.lifecycle.start_deployment(build.id).await.unwrap();

        let mut running = fx.lifecycle.load(build.id).await.unwrap();
        fx.lifecycle
            .deployment_failed(&mut running, false)
            .await
            .unwrap();
        assert!(fx.lifecycle.holds_lock(&running).await.unwrap());

        let finished = fx.lifecycle.finish_deployment(build.id).await.unwrap();
        assert_eq!(finished.status, BuildStatus::Failed);
        assert!(finished.deployed_at.is_some());
        assert_eq!(finished.log.last().unwrap(), "Finishing deployment");
        assert!(fx.lifecycle.lock_holder().await.unwrap().is_none());
        assert_eq!(*fx.deploy.completed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_finish_marks_built() {
        let fx = Fixture::new();
        let build = fx.create(new_build("a")).await;
        fx.lifecycle.start_deployment(build.id).await.unwrap();
        let finished = fx.lifecycle.finish_deployment(build.id).await.unwrap();
        assert_eq!(finished.status, BuildStatus::Built);
        assert_eq!(
            finished.log,
            vec![
                "Starting deployment".to_string(),
                "Finishing deployment".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_decommission_survives_teardown_failure() {
        let fx = Fixture::with_plugins(
            crate::testing::FakeGenerate::default(),
            crate::testing::FakeDeploy::default().failing_teardown(),
        );
        let build = fx.create(new_build("a")).await;

        let build = fx.lifecycle.decommission(build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Decommissioned);
        assert_eq!(build.log.last().unwrap(), "Decommissioned preview site build");
        assert!(build.log.iter().any(|l| l.starts_with("ERROR: Failed to tear down")));
    }

    #[tokio::test]
    async fn test_decommissioned_build_cannot_restart() {
        let fx = Fixture::new();
        let build = fx.create(new_build("a")).await;
        fx.lifecycle.decommission(build.id).await.unwrap();

        let err = fx.lifecycle.start_deployment(build.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let build = fx.lifecycle.load(build.id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Decommissioned);
        assert!(fx.lifecycle.lock_holder().await.unwrap().is_none());
        assert!(fx.generate.prepared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_building_build_cannot_be_decommissioned() {
        let fx = Fixture::new();
        let build = fx.create(new_build("a")).await;
        fx.lifecycle.start_deployment(build.id).await.unwrap();

        let err = fx.lifecycle.decommission(build.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(
            fx.lifecycle.lock_holder().await.unwrap(),
            Some(build.uuid.to_string())
        );
        assert_eq!(
            fx.lifecycle.load(build.id).await.unwrap().status,
            BuildStatus::Building
        );

        let finished = fx.lifecycle.finish_deployment(build.id).await.unwrap();
        assert_eq!(finished.status, BuildStatus::Built);
        let retired = fx.lifecycle.decommission(build.id).await.unwrap();
        assert_eq!(retired.status, BuildStatus::Decommissioned);
    }

    #[tokio::test]
    async fn test_finish_leaves_decommissioned_build_retired() {
        let fx = Fixture::new();
        let mut build = fx.create(new_build("a")).await;
        fx.lifecycle.start_deployment(build.id).await.unwrap();
        // Retired out from under the run, after an operator reset.
        fx.lifecycle.force_reset().await.unwrap();
        build = fx.lifecycle.load(build.id).await.unwrap();
        build.mark_decommissioned();
        fx.lifecycle.save(&mut build).await.unwrap();

        let finished = fx.lifecycle.finish_deployment(build.id).await.unwrap();
        assert_eq!(finished.status, BuildStatus::Decommissioned);
    }

    #[tokio::test]
    async fn test_delete_attempts_every_artifact() {
        let fx = Fixture::new();
        let mut build = fx.create(new_build("a")).await;
        for name in ["a.html", "b.html", "c.css"] {
            build.add_artifact(crate::testing::artifact(name));
        }
        fx.lifecycle.save(&mut build).await.unwrap();

        fx.lifecycle.delete(build.id).await.unwrap();
        assert!(matches!(
            fx.lifecycle.load(build.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert_eq!(
            fx.deploy.removed.lock().unwrap().clone(),
            vec!["a.html".to_string(), "b.html".to_string(), "c.css".to_string()]
        );
    }

    #[tokio::test]
    async fn test_running_build_and_force_reset() {
        let fx = Fixture::new();
        assert!(fx.lifecycle.running_build().await.unwrap().is_none());

        let build = fx.create(new_build("a")).await;
        fx.lifecycle.start_deployment(build.id).await.unwrap();
        let running = fx.lifecycle.running_build().await.unwrap().unwrap();
        assert_eq!(running.id, build.id);

        let holder = fx.lifecycle.force_reset().await.unwrap();
        assert_eq!(holder, Some(build.uuid.to_string()));
        assert!(fx.lifecycle.running_build().await.unwrap().is_none());
        assert_eq!(fx.lifecycle.force_reset().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let fx = Fixture::new();
        let now = Utc::now();
        let mut expired = new_build("old");
        expired.expiry_date = Some(now - Duration::days(1));
        let expired = fx.create(expired).await;
        let mut fresh = new_build("new");
        fresh.expiry_date = Some(now + Duration::days(1));
        let fresh = fx.create(fresh).await;

        let swept = fx.lifecycle.sweep_expired(now).await.unwrap();
        assert_eq!(swept, vec![expired.id]);
        assert_eq!(
            fx.lifecycle.load(expired.id).await.unwrap().status,
            BuildStatus::Decommissioned
        );
        assert_eq!(
            fx.lifecycle.load(fresh.id).await.unwrap().status,
            BuildStatus::Pending
        );

        // Already decommissioned builds are not swept again.
        assert!(fx.lifecycle.sweep_expired(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_item_links() {
        let fx = Fixture::new();
        let build = fx.create(new_build("a")).await;
        let links = fx.lifecycle.item_links(&build).unwrap();
        assert_eq!(
            links,
            vec![
                (
                    EntityRef::new("node", "1"),
                    "https://preview.test/site/node/1/index.html".to_string()
                ),
                (
                    EntityRef::new("node", "2"),
                    "https://preview.test/site/node/2/index.html".to_string()
                ),
            ]
        );

        let mut other = build.clone();
        other.strategy = "missing".to_string();
        assert!(matches!(
            fx.lifecycle.item_links(&other).unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
