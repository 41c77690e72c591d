//! # branchpulse-source
//!
//! Read-only view of the hosting service.
//!
//! [`SourceAdapter`] is what the reconciler consumes; [`GitHubSource`]
//! implements it against the GitHub REST API. Responses are validated into
//! the typed records below before they leave this crate.

pub mod error;
pub mod github;
mod wire;

use std::time::Duration;

use chrono::{DateTime, Utc};

use branchpulse_core::{BranchName, Config, RepoName, ReviewerSet};

pub use error::SourceError;
pub use github::GitHubSource;

/// Author and timestamp of a branch's head commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchOrigin {
    pub creator: String,
    pub created_at: DateTime<Utc>,
}

/// A pull request whose head is the branch being examined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub opened_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
}

/// Queries the reconciler needs from the hosting service.
pub trait SourceAdapter: Send + Sync {
    /// Names of every branch that currently exists in `repo`.
    fn list_live_branches(&self, repo: &RepoName) -> Result<Vec<BranchName>, SourceError>;

    /// Origin of `branch`, or `None` when the branch no longer exists.
    fn get_branch_origin(
        &self,
        repo: &RepoName,
        branch: &BranchName,
    ) -> Result<Option<BranchOrigin>, SourceError>;

    /// Pull requests (any state) headed by `branch`, oldest first.
    fn list_pull_requests(
        &self,
        repo: &RepoName,
        branch: &BranchName,
    ) -> Result<Vec<PullRequest>, SourceError>;

    /// Distinct logins of everyone who submitted a review on `pr_number`.
    fn list_reviewers(&self, repo: &RepoName, pr_number: u64) -> Result<ReviewerSet, SourceError>;
}

/// Connection settings for [`GitHubSource`].
#[derive(Clone)]
pub struct SourceConfig {
    pub api_base_url: String,
    pub organization: String,
    /// Bearer credential; requests go out unauthenticated when `None`.
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    /// Delay before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl SourceConfig {
    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

    pub fn from_config(config: &Config, token: Option<String>) -> Self {
        Self {
            api_base_url: config.api_base_url.clone(),
            organization: config.organization.clone(),
            token,
            request_timeout: config.request_timeout(),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Self::DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("api_base_url", &self.api_base_url)
            .field("organization", &self.organization)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}
