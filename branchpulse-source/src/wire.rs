//! Raw GitHub payloads and their validation into typed records.
//!
//! Every field the API may omit or null is an `Option` here; conversion
//! rejects payloads missing anything the records require.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use branchpulse_core::{parse_timestamp, BranchName, ReviewerSet};

use crate::error::SourceError;
use crate::{BranchOrigin, PullRequest};

#[derive(Debug, Deserialize)]
pub(crate) struct WireBranch {
    pub name: String,
}

impl From<WireBranch> for BranchName {
    fn from(b: WireBranch) -> Self {
        BranchName(b.name)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCommit {
    pub commit: Option<WireCommitBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCommitBody {
    pub author: Option<WireAuthor>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireAuthor {
    pub name: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WirePull {
    pub number: u64,
    pub created_at: Option<String>,
    pub merged_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireReview {
    pub user: Option<WireUser>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUser {
    pub login: String,
}

impl WireCommit {
    pub fn into_origin(self, url: &str) -> Result<BranchOrigin, SourceError> {
        let author = self
            .commit
            .and_then(|c| c.author)
            .ok_or_else(|| SourceError::malformed(url, "commit has no author"))?;
        let creator = author
            .name
            .ok_or_else(|| SourceError::malformed(url, "commit author has no name"))?;
        let date = author
            .date
            .ok_or_else(|| SourceError::malformed(url, "commit author has no date"))?;
        Ok(BranchOrigin {
            creator,
            created_at: timestamp(url, "commit.author.date", &date)?,
        })
    }
}

impl WirePull {
    pub fn into_pull_request(self, url: &str) -> Result<PullRequest, SourceError> {
        let created_at = self.created_at.ok_or_else(|| {
            SourceError::malformed(url, format!("pull request #{} has no created_at", self.number))
        })?;
        Ok(PullRequest {
            number: self.number,
            opened_at: timestamp(url, "created_at", &created_at)?,
            merged_at: self
                .merged_at
                .as_deref()
                .map(|m| timestamp(url, "merged_at", m))
                .transpose()?,
        })
    }
}

/// Reviews without a user (deleted accounts) are dropped.
pub(crate) fn reviewer_set(reviews: Vec<WireReview>) -> ReviewerSet {
    reviews
        .into_iter()
        .filter_map(|r| r.user.map(|u| u.login))
        .collect()
}

fn timestamp(url: &str, field: &str, value: &str) -> Result<DateTime<Utc>, SourceError> {
    parse_timestamp(value)
        .map_err(|e| SourceError::malformed(url, format!("{field} '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "https://api.github.com/repos/acme/api/commits/x";

    #[test]
    fn commit_with_author_becomes_origin() {
        let commit: WireCommit = serde_json::from_str(
            r#"{"sha":"abc","commit":{"author":{"name":"Alice","email":"a@x","date":"2024-05-01T10:00:00Z"}}}"#,
        )
        .unwrap();
        let origin = commit.into_origin(URL).unwrap();
        assert_eq!(origin.creator, "Alice");
        assert_eq!(
            origin.created_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn commit_without_author_is_malformed() {
        let commit: WireCommit = serde_json::from_str(r#"{"commit":{"author":null}}"#).unwrap();
        let err = commit.into_origin(URL).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }), "got: {err}");
    }

    #[test]
    fn unparsable_date_is_malformed() {
        let pull: WirePull =
            serde_json::from_str(r#"{"number":7,"created_at":"last tuesday","merged_at":null}"#)
                .unwrap();
        let err = pull.into_pull_request(URL).unwrap_err();
        assert!(err.to_string().contains("last tuesday"));
    }

    #[test]
    fn null_users_are_dropped_and_duplicates_collapse() {
        let reviews: Vec<WireReview> = serde_json::from_str(
            r#"[{"user":{"login":"bob"}},{"user":null},{"user":{"login":"alice"}},{"user":{"login":"bob"}}]"#,
        )
        .unwrap();
        assert_eq!(reviewer_set(reviews).to_delimited(), "alice,bob");
    }
}
