//! # branchpulse-store
//!
//! Durable keyed table of tracked branches.
//!
//! [`EntityStore`] is the contract the reconciler writes through;
//! [`SqliteStore`] implements it on a single SQLite table with a uniqueness
//! constraint on `(branch_name, repo_name)`. [`stats::Metrics`] answers the
//! read-only time-series queries consumed downstream.

pub mod error;
pub mod sqlite;
pub mod stats;

use chrono::{DateTime, Utc};

use branchpulse_core::{BranchKey, Fingerprint, ReviewState};

pub use error::StoreError;
pub use sqlite::{BranchFilter, SqliteStore};
pub use stats::{Metrics, MetricsSnapshot};

/// A first observation of a live branch, or a re-observation of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBranch {
    pub key: BranchKey,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub review: ReviewState,
    pub fingerprint: Fingerprint,
}

/// Mutable-field update for a branch that may no longer be live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingUpdate {
    pub key: BranchKey,
    pub review: ReviewState,
    pub fingerprint: Fingerprint,
}

/// Storage operations the reconciler depends on.
///
/// Every write is atomic per key. Writes against a key with an empty branch
/// or repository name fail with [`StoreError::InvalidKey`].
pub trait EntityStore: Send + Sync {
    /// Stored fingerprint for `key`, if the row exists.
    fn get_fingerprint(&self, key: &BranchKey) -> Result<Option<Fingerprint>, StoreError>;

    /// Keys of every row whose `merged_at` is unset.
    fn list_unmerged(&self) -> Result<Vec<BranchKey>, StoreError>;

    /// Insert a row, or overwrite the mutable fields of an existing one.
    /// `creator` and `created_at` of an existing row are left untouched.
    fn upsert_new(&self, branch: &NewBranch) -> Result<(), StoreError>;

    /// Overwrite the mutable fields of an existing row. Never creates a row;
    /// returns whether a row was updated.
    fn update_closing(&self, update: &ClosingUpdate) -> Result<bool, StoreError>;
}

pub(crate) fn ensure_key(key: &BranchKey) -> Result<(), StoreError> {
    if key.is_well_formed() {
        Ok(())
    } else {
        Err(StoreError::InvalidKey {
            branch: key.branch.0.clone(),
            repo: key.repo.0.clone(),
        })
    }
}
