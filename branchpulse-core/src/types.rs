//! Domain types for branch tracking.
//!
//! Timestamps are always `DateTime<Utc>`. Their persisted and fingerprinted
//! form is produced by [`format_timestamp`] so that lexical order matches
//! chronological order.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A source-control branch name. Not unique across repositories.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchName(pub String);

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BranchName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BranchName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A repository name inside the configured organization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepoName(pub String);

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepoName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepoName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of a tracked branch: `(branch_name, repo_name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchKey {
    pub branch: BranchName,
    pub repo: RepoName,
}

impl BranchKey {
    pub fn new(branch: impl Into<BranchName>, repo: impl Into<RepoName>) -> Self {
        Self {
            branch: branch.into(),
            repo: repo.into(),
        }
    }

    /// Both parts must be non-empty for the key to be written.
    pub fn is_well_formed(&self) -> bool {
        !self.branch.0.is_empty() && !self.repo.0.is_empty()
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.branch, self.repo)
    }
}

// ---------------------------------------------------------------------------
// Reviewer set
// ---------------------------------------------------------------------------

/// Order-insignificant set of reviewer logins.
///
/// Backed by a `BTreeSet`, so iteration and [`ReviewerSet::to_delimited`] are
/// always sorted and duplicate-free.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewerSet(BTreeSet<String>);

impl ReviewerSet {
    pub const DELIMITER: char = ',';

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, login: impl Into<String>) -> bool {
        self.0.insert(login.into())
    }

    pub fn contains(&self, login: &str) -> bool {
        self.0.contains(login)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Canonical comma-delimited form, sorted.
    pub fn to_delimited(&self) -> String {
        self.0
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(&Self::DELIMITER.to_string())
    }

    /// Parse the persisted form. Blank segments are ignored.
    pub fn from_delimited(raw: &str) -> Self {
        raw.split(Self::DELIMITER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ReviewerSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ReviewerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_delimited())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// The review/merge facts of a branch that change over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewState {
    pub pr_opened_at: Option<DateTime<Utc>>,
    /// Never populated by the reconciler; kept for layout compatibility.
    pub merger: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub reviewers: ReviewerSet,
}

impl ReviewState {
    /// A merged branch is terminal and leaves the unmerged backlog.
    pub fn is_terminal(&self) -> bool {
        self.merged_at.is_some()
    }
}

/// A persisted tracked branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedBranch {
    pub key: BranchKey,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub review: ReviewState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

// ---------------------------------------------------------------------------
// Timestamp text form
// ---------------------------------------------------------------------------

/// `2024-05-01T10:00:00Z`; second precision, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse any RFC 3339 timestamp and normalize it to UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
