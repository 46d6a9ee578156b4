use std::sync::Arc;

use crate::authz::index::PolicyIndex;
use crate::authz::loader::load_policies;
use crate::authz::types::PolicySet;
use crate::authz::{web, Authorizer, KdlDirectoryRepository, PolicyStore, PolicySync};
use crate::errors::AppError;
use crate::settings::Settings;

/// Load the policy repository, start polling it, and serve the PDP API
/// until the listener fails.
pub async fn serve(settings: Settings) -> Result<(), AppError> {
    let authorizer = start_authorizer(&settings).await?;
    let router = web::router(authorizer);

    let addr = settings.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| AppError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(%addr, "Authorization API listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Build the authorizer over a store seeded from the policy directory.
/// With authorization disabled the repository is not read at all.
pub async fn start_authorizer(settings: &Settings) -> Result<Arc<Authorizer>, AppError> {
    let store = Arc::new(PolicyStore::new());
    let authorizer = Authorizer::new(store.clone())
        .with_enabled(settings.authz.enabled)
        .with_parallel_batch_threshold(settings.authz.parallel_batch_threshold);

    if !settings.authz.enabled {
        tracing::warn!("Authorization is disabled; every PDP call will be refused");
        return Ok(Arc::new(authorizer));
    }

    let repository = Arc::new(KdlDirectoryRepository::new(&settings.authz.policies_dir));
    let mut sync = PolicySync::new(store, repository);
    sync.sync().await?;

    match settings.authz.poll_interval() {
        Some(interval) => {
            tracing::info!(
                dir = %settings.authz.policies_dir.display(),
                interval_secs = interval.as_secs(),
                "Watching policy directory"
            );
            sync.spawn(interval);
        }
        None => tracing::info!("Policy polling disabled"),
    }

    Ok(Arc::new(authorizer))
}

/// Summary printed by `authzd --check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCheck {
    pub roles: usize,
    pub mappings: usize,
    pub system_mappings: usize,
    pub dangling_mappings: usize,
}

impl PolicyCheck {
    pub fn of(set: &PolicySet) -> Self {
        Self {
            roles: set.roles.len(),
            mappings: set.mappings.len(),
            system_mappings: set.mappings.values().filter(|m| m.system).count(),
            dangling_mappings: PolicyIndex::build(set).dangling_count(),
        }
    }
}

/// Parse and validate the configured policy directory without serving.
pub fn check_policies(settings: &Settings) -> Result<PolicyCheck, AppError> {
    let set = load_policies(&settings.authz.policies_dir)?;
    Ok(PolicyCheck::of(&set))
}
