//! Two-phase reconciliation of one repository.
//!
//! ## Phase A: live branches
//!
//! 1. List live branches; drop the trunk branch.
//! 2. Fetch origin metadata (absent ⇒ the branch vanished, skip).
//! 3. Derive review state from the earliest-opened pull request.
//! 4. Fingerprint and compare with the stored digest.
//! 5. `upsert_new` only when the digests differ.
//!
//! ## Phase B: unmerged backlog
//!
//! For every stored, unmerged key of the repository: derive review state
//! again, fingerprint, and `update_closing` on change. This is how branches
//! deleted after merging still get their merge recorded.
//!
//! Source failures skip the branch and leave its row untouched. Store
//! failures abort the pass.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use branchpulse_core::{review_fingerprint, BranchKey, BranchName, RepoName, ReviewState};
use branchpulse_source::{SourceAdapter, SourceError};
use branchpulse_store::{ClosingUpdate, EntityStore, NewBranch};

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Which half of the pass produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Live,
    Backlog,
}

/// Why a branch was left alone this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The branch disappeared between listing and inspection.
    Vanished,
    /// A source call failed.
    AdapterFailure(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Vanished => f.write_str("branch vanished"),
            SkipReason::AdapterFailure(e) => write!(f, "source failure: {e}"),
        }
    }
}

/// What happened to one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// The fingerprint changed and the row was written.
    Written,
    /// Dry run: the row would have been written.
    WouldWrite,
    /// The fingerprint matched the stored one.
    Unchanged,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchOutcome {
    pub key: BranchKey,
    pub phase: Phase,
    pub action: Action,
}

/// Everything one repository pass did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoPassResult {
    pub repo: RepoName,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when the live listing failed and Phase A was skipped.
    pub listing_error: Option<String>,
    pub outcomes: Vec<BranchOutcome>,
}

impl RepoPassResult {
    fn count(&self, pred: impl Fn(&Action) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.action)).count()
    }

    pub fn written(&self) -> usize {
        self.count(|a| matches!(a, Action::Written))
    }

    pub fn would_write(&self) -> usize {
        self.count(|a| matches!(a, Action::WouldWrite))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|a| matches!(a, Action::Unchanged))
    }

    pub fn skipped(&self) -> usize {
        self.count(|a| matches!(a, Action::Skipped(_)))
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Excluded by name from Phase A.
    pub trunk_branch: String,
    /// Compute everything, write nothing.
    pub dry_run: bool,
}

pub struct Reconciler<'a> {
    source: &'a dyn SourceAdapter,
    store: &'a dyn EntityStore,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        source: &'a dyn SourceAdapter,
        store: &'a dyn EntityStore,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            source,
            store,
            options,
        }
    }

    /// Run Phase A then Phase B for `repo`.
    pub fn reconcile_repo(&self, repo: &RepoName) -> Result<RepoPassResult, SyncError> {
        let started_at = Utc::now();
        let mut outcomes = Vec::new();

        let listing_error = match self.source.list_live_branches(repo) {
            Ok(branches) => {
                for branch in branches {
                    if branch.0 == self.options.trunk_branch {
                        continue;
                    }
                    let key = BranchKey::new(branch, repo.clone());
                    let action = self.reconcile_live(&key)?;
                    outcomes.push(BranchOutcome {
                        key,
                        phase: Phase::Live,
                        action,
                    });
                }
                None
            }
            Err(e) => {
                tracing::warn!("{repo}: listing live branches failed, skipping live phase: {e}");
                Some(e.to_string())
            }
        };

        let backlog: Vec<BranchKey> = self
            .store
            .list_unmerged()?
            .into_iter()
            .filter(|key| &key.repo == repo)
            .collect();
        for key in backlog {
            let action = self.reconcile_backlog(&key)?;
            outcomes.push(BranchOutcome {
                key,
                phase: Phase::Backlog,
                action,
            });
        }

        let result = RepoPassResult {
            repo: repo.clone(),
            started_at,
            finished_at: Utc::now(),
            listing_error,
            outcomes,
        };
        tracing::info!(
            "{repo}: {} written, {} unchanged, {} skipped{}",
            result.written() + result.would_write(),
            result.unchanged(),
            result.skipped(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );
        Ok(result)
    }

    fn reconcile_live(&self, key: &BranchKey) -> Result<Action, SyncError> {
        let origin = match self.source.get_branch_origin(&key.repo, &key.branch) {
            Ok(Some(origin)) => origin,
            Ok(None) => {
                tracing::debug!("{key}: vanished before inspection");
                return Ok(Action::Skipped(SkipReason::Vanished));
            }
            Err(e) => return Ok(skip(key, e)),
        };
        let review = match self.review_state(&key.repo, &key.branch) {
            Ok(review) => review,
            Err(e) => return Ok(skip(key, e)),
        };

        let fingerprint = review_fingerprint(key, &review);
        if self.store.get_fingerprint(key)?.as_ref() == Some(&fingerprint) {
            tracing::debug!("unchanged: {key}");
            return Ok(Action::Unchanged);
        }
        if self.options.dry_run {
            tracing::info!("[dry-run] would write: {key}");
            return Ok(Action::WouldWrite);
        }

        self.store.upsert_new(&NewBranch {
            key: key.clone(),
            creator: origin.creator,
            created_at: origin.created_at,
            review,
            fingerprint,
        })?;
        tracing::info!("wrote: {key}");
        Ok(Action::Written)
    }

    fn reconcile_backlog(&self, key: &BranchKey) -> Result<Action, SyncError> {
        let review = match self.review_state(&key.repo, &key.branch) {
            Ok(review) => review,
            Err(e) => return Ok(skip(key, e)),
        };

        let fingerprint = review_fingerprint(key, &review);
        if self.store.get_fingerprint(key)?.as_ref() == Some(&fingerprint) {
            tracing::debug!("unchanged: {key}");
            return Ok(Action::Unchanged);
        }
        if self.options.dry_run {
            tracing::info!("[dry-run] would update: {key}");
            return Ok(Action::WouldWrite);
        }

        let updated = self.store.update_closing(&ClosingUpdate {
            key: key.clone(),
            review,
            fingerprint,
        })?;
        if updated {
            tracing::info!("updated: {key}");
            Ok(Action::Written)
        } else {
            Ok(Action::Unchanged)
        }
    }

    /// Review state from the earliest-opened pull request. Reviewers are only
    /// fetched once that pull request has merged.
    fn review_state(
        &self,
        repo: &RepoName,
        branch: &BranchName,
    ) -> Result<ReviewState, SourceError> {
        let pulls = self.source.list_pull_requests(repo, branch)?;
        let Some(pr) = pulls.iter().min_by_key(|p| (p.opened_at, p.number)) else {
            return Ok(ReviewState::default());
        };

        let mut review = ReviewState {
            pr_opened_at: Some(pr.opened_at),
            ..ReviewState::default()
        };
        if let Some(merged_at) = pr.merged_at {
            review.merged_at = Some(merged_at);
            review.reviewers = self.source.list_reviewers(repo, pr.number)?;
        }
        Ok(review)
    }
}

fn skip(key: &BranchKey, error: SourceError) -> Action {
    tracing::warn!("{key}: skipped: {error}");
    Action::Skipped(SkipReason::AdapterFailure(error.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
