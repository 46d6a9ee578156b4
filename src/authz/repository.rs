use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::authz::errors::AuthzError;
use crate::authz::loader::load_policies;
use crate::authz::store::PolicyStore;
use crate::authz::types::PolicySet;

/// Durable source of roles and bindings. Each fetch returns the complete
/// current set.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn fetch(&self) -> Result<PolicySet, AuthzError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Repository backed by a directory of `.kdl` policy files.
#[derive(Debug, Clone)]
pub struct KdlDirectoryRepository {
    dir: PathBuf,
}

impl KdlDirectoryRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PolicyRepository for KdlDirectoryRepository {
    async fn fetch(&self) -> Result<PolicySet, AuthzError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || load_policies(&dir))
            .await
            .map_err(|e| AuthzError::Internal(format!("policy load task failed: {e}")))?
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Keeps a `PolicyStore` in step with a repository. The store is only
/// republished when the fetched set differs from the previous fetch.
pub struct PolicySync {
    store: Arc<PolicyStore>,
    repository: Arc<dyn PolicyRepository>,
    last: Option<PolicySet>,
}

impl PolicySync {
    pub fn new(store: Arc<PolicyStore>, repository: Arc<dyn PolicyRepository>) -> Self {
        Self {
            store,
            repository,
            last: None,
        }
    }

    /// Fetch once. Returns whether a new snapshot was published. On error
    /// the current snapshot stays live.
    pub async fn sync(&mut self) -> Result<bool, AuthzError> {
        let fetched = self.repository.fetch().await?;
        if self.last.as_ref() == Some(&fetched) {
            tracing::debug!(source = %self.repository.describe(), "policy set unchanged");
            return Ok(false);
        }
        self.store.replace_all(fetched.clone());
        self.last = Some(fetched);
        Ok(true)
    }

    /// Poll forever at `interval`. The first tick fires after one interval,
    /// so callers normally `sync` once themselves before spawning.
    pub fn spawn(mut self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sync().await {
                    Ok(true) => {
                        tracing::info!(
                            source = %self.repository.describe(),
                            "Reloaded authorization policies"
                        );
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(
                            source = %self.repository.describe(),
                            error = %e,
                            "Policy sync failed; keeping the current policy set"
                        );
                    }
                }
            }
        })
    }
}
