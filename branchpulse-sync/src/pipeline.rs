//! Shared sync pipeline entrypoint used by CLI and daemon.

use std::path::Path;

use branchpulse_core::{Config, RepoName};
use branchpulse_source::{GitHubSource, SourceAdapter, SourceConfig};
use branchpulse_store::{EntityStore, SqliteStore};

use crate::reconciler::{ReconcileOptions, Reconciler, RepoPassResult};
use crate::SyncError;

/// Scope for a sync pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Every configured repository, in configuration order.
    All,
    /// A single configured repository.
    Repository(RepoName),
}

/// Result of one repository within a run. A failed repository does not stop
/// the ones after it.
#[derive(Debug)]
pub struct RepoRun {
    pub repo: RepoName,
    pub result: Result<RepoPassResult, SyncError>,
}

/// Repositories a scope covers.
pub fn repositories_in_scope(
    config: &Config,
    scope: &SyncScope,
) -> Result<Vec<RepoName>, SyncError> {
    match scope {
        SyncScope::All => Ok(config.repositories.clone()),
        SyncScope::Repository(repo) => {
            if config.repositories.contains(repo) {
                Ok(vec![repo.clone()])
            } else {
                Err(SyncError::UnknownRepository {
                    repo: repo.0.clone(),
                    known: config
                        .repositories
                        .iter()
                        .map(|r| r.0.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            }
        }
    }
}

/// Reconcile every repository in `scope` against `source` and `store`.
pub fn run(
    config: &Config,
    source: &dyn SourceAdapter,
    store: &dyn EntityStore,
    scope: &SyncScope,
    dry_run: bool,
) -> Result<Vec<RepoRun>, SyncError> {
    let repos = repositories_in_scope(config, scope)?;
    let reconciler = Reconciler::new(
        source,
        store,
        ReconcileOptions {
            trunk_branch: config.trunk_branch.clone(),
            dry_run,
        },
    );

    let runs = repos
        .into_iter()
        .map(|repo| {
            let result = reconciler.reconcile_repo(&repo);
            if let Err(e) = &result {
                tracing::error!("{repo}: pass aborted: {e}");
            }
            RepoRun { repo, result }
        })
        .collect();
    Ok(runs)
}

/// [`run`] with the configured SQLite store and GitHub client.
pub fn run_configured(
    home: &Path,
    config: &Config,
    token: Option<String>,
    scope: &SyncScope,
    dry_run: bool,
) -> Result<Vec<RepoRun>, SyncError> {
    config.validate()?;
    let store = SqliteStore::open(&config.database_path_at(home))?;
    let source = GitHubSource::new(SourceConfig::from_config(config, token))?;
    run(config, &source, &store, scope, dry_run)
}
