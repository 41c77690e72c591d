//! Error types for branchpulse-sync.

use thiserror::Error;

use branchpulse_core::ConfigError;
use branchpulse_source::SourceError;
use branchpulse_store::StoreError;

/// Errors that abort a repository pass or a pipeline run.
///
/// Adapter failures on individual branches never surface here; they are
/// recorded as skipped outcomes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The entity store failed; the repository pass stops.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The source client could not be built.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// The configuration could not be loaded or is unusable.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A single-repository run named a repository that is not configured.
    #[error("repository '{repo}' is not configured; known: {known}")]
    UnknownRepository { repo: String, known: String },
}
