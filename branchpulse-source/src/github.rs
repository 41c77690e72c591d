//! GitHub REST implementation of [`SourceAdapter`].
//!
//! Endpoints (all under `/repos/{org}/{repo}`):
//!
//! | Operation              | Request                                        |
//! |------------------------|------------------------------------------------|
//! | `list_live_branches`   | `GET /branches`                                |
//! | `get_branch_origin`    | `GET /commits/{branch}`                        |
//! | `list_pull_requests`   | `GET /pulls?state=all&head={org}:{branch}`     |
//! | `list_reviewers`       | `GET /pulls/{number}/reviews`                  |
//!
//! List endpoints follow `Link: <…>; rel="next"` with `per_page=100`.
//! 5xx, 429, rate-limited 403 and transport failures are retried up to
//! `max_attempts` times.

use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;

use branchpulse_core::{BranchName, RepoName, ReviewerSet};

use crate::error::SourceError;
use crate::wire::{self, WireBranch, WireCommit, WirePull, WireReview};
use crate::{BranchOrigin, PullRequest, SourceAdapter, SourceConfig};

const USER_AGENT: &str = concat!("branchpulse/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: &str = "100";
const MAX_ERROR_BODY: usize = 512;

/// Blocking GitHub client.
pub struct GitHubSource {
    agent: ureq::Agent,
    base: Url,
    organization: String,
    token: Option<String>,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl GitHubSource {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let base = Url::parse(&config.api_base_url).map_err(|e| SourceError::InvalidUrl {
            url: config.api_base_url.clone(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl {
                url: config.api_base_url,
                reason: "URL cannot carry a path".into(),
            });
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build();

        Ok(Self {
            agent,
            base,
            organization: config.organization,
            token: config.token,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff,
        })
    }

    /// `{base}/repos/{org}/{repo}/{tail…}` with every segment percent-encoded.
    fn endpoint(&self, repo: &RepoName, tail: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl {
                url: self.base.to_string(),
                reason: "URL cannot carry a path".into(),
            })?
            .pop_if_empty()
            .extend(["repos", self.organization.as_str(), repo.0.as_str()])
            .extend(tail);
        Ok(url)
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    fn send(&self, url: &str) -> Result<ureq::Response, SourceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .agent
                .get(url)
                .set("Accept", ACCEPT)
                .set("X-GitHub-Api-Version", API_VERSION);
            if let Some(token) = &self.token {
                request = request.set("Authorization", &format!("Bearer {token}"));
            }

            let reason = match request.call() {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(401, _)) => {
                    return Err(SourceError::Unauthorized {
                        url: url.to_string(),
                    })
                }
                Err(ureq::Error::Status(status, response)) if is_transient(status, &response) => {
                    format!("HTTP {status}")
                }
                Err(ureq::Error::Status(status, response)) => {
                    let mut body = response.into_string().unwrap_or_default();
                    truncate(&mut body, MAX_ERROR_BODY);
                    return Err(SourceError::Http {
                        status,
                        url: url.to_string(),
                        body,
                    });
                }
                Err(ureq::Error::Transport(transport)) => transport.to_string(),
            };

            if attempt >= self.max_attempts {
                return Err(SourceError::Retryable {
                    url: url.to_string(),
                    attempts: attempt,
                    reason,
                });
            }
            tracing::warn!(
                "GET {url} failed ({reason}); retry {attempt}/{}",
                self.max_attempts - 1
            );
            std::thread::sleep(self.retry_backoff * attempt);
        }
    }

    fn get_one<T: DeserializeOwned>(&self, url: &Url) -> Result<T, SourceError> {
        let url = url.as_str();
        self.send(url)?
            .into_json()
            .map_err(|e| SourceError::malformed(url, e.to_string()))
    }

    fn get_all<T: DeserializeOwned>(&self, mut first: Url) -> Result<Vec<T>, SourceError> {
        first.query_pairs_mut().append_pair("per_page", PER_PAGE);

        let mut items = Vec::new();
        let mut next = Some(first.to_string());
        let mut pages = 0usize;
        while let Some(url) = next.take() {
            let response = self.send(&url)?;
            next = response.header("link").and_then(next_link);
            let page: Vec<T> = response
                .into_json()
                .map_err(|e| SourceError::malformed(&url, e.to_string()))?;
            items.extend(page);
            pages += 1;
        }
        tracing::debug!("fetched {} item(s) in {pages} page(s)", items.len());
        Ok(items)
    }
}

impl SourceAdapter for GitHubSource {
    fn list_live_branches(&self, repo: &RepoName) -> Result<Vec<BranchName>, SourceError> {
        let url = self.endpoint(repo, &["branches"])?;
        let branches: Vec<WireBranch> = self.get_all(url)?;
        Ok(branches.into_iter().map(BranchName::from).collect())
    }

    fn get_branch_origin(
        &self,
        repo: &RepoName,
        branch: &BranchName,
    ) -> Result<Option<BranchOrigin>, SourceError> {
        let url = self.endpoint(repo, &["commits", branch.0.as_str()])?;
        match self.get_one::<WireCommit>(&url) {
            Ok(commit) => commit.into_origin(url.as_str()).map(Some),
            Err(SourceError::Http {
                status: 404 | 422, ..
            }) => {
                tracing::debug!("branch {branch} in {repo} no longer exists");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn list_pull_requests(
        &self,
        repo: &RepoName,
        branch: &BranchName,
    ) -> Result<Vec<PullRequest>, SourceError> {
        let mut url = self.endpoint(repo, &["pulls"])?;
        url.query_pairs_mut()
            .append_pair("state", "all")
            .append_pair("head", &format!("{}:{}", self.organization, branch));
        let pulls: Vec<WirePull> = self.get_all(url.clone())?;

        let mut pulls = pulls
            .into_iter()
            .map(|p| p.into_pull_request(url.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        pulls.sort_by_key(|p| (p.opened_at, p.number));
        Ok(pulls)
    }

    fn list_reviewers(&self, repo: &RepoName, pr_number: u64) -> Result<ReviewerSet, SourceError> {
        let number = pr_number.to_string();
        let url = self.endpoint(repo, &["pulls", number.as_str(), "reviews"])?;
        let reviews: Vec<WireReview> = self.get_all(url)?;
        Ok(wire::reviewer_set(reviews))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_transient(status: u16, response: &ureq::Response) -> bool {
    match status {
        429 => true,
        403 => response.header("x-ratelimit-remaining") == Some("0"),
        s => s >= 500,
    }
}

/// Target of the `rel="next"` entry in a `Link` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        if !parts.any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }
        target
            .strip_prefix('<')?
            .strip_suffix('>')
            .map(str::to_string)
    })
}

fn truncate(s: &mut String, max: usize) {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base: &str) -> GitHubSource {
        GitHubSource::new(SourceConfig {
            api_base_url: base.to_string(),
            organization: "acme".into(),
            token: None,
            request_timeout: Duration::from_secs(1),
            max_attempts: 1,
            retry_backoff: Duration::ZERO,
        })
        .unwrap()
    }

    #[test]
    fn endpoint_encodes_slashes_in_branch_names() {
        let gh = source("https://api.github.com");
        let url = gh
            .endpoint(&RepoName::from("api"), &["commits", "feature/login"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/api/commits/feature%2Flogin"
        );
    }

    #[test]
    fn endpoint_keeps_enterprise_base_path() {
        let gh = source("https://ghe.example.com/api/v3/");
        let url = gh.endpoint(&RepoName::from("api"), &["branches"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/acme/api/branches"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = GitHubSource::new(SourceConfig {
            api_base_url: "not a url".into(),
            organization: "acme".into(),
            token: None,
            request_timeout: Duration::from_secs(1),
            max_attempts: 1,
            retry_backoff: Duration::ZERO,
        })
        .err()
        .expect("error");
        assert!(matches!(err, SourceError::InvalidUrl { .. }));
    }

    #[test]
    fn next_link_is_found_among_relations() {
        let header = r#"<https://api.github.com/x?page=1>; rel="prev", <https://api.github.com/x?page=3>; rel="next", <https://api.github.com/x?page=9>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/x?page=3")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let header = r#"<https://api.github.com/x?page=1>; rel="first", <https://api.github.com/x?page=2>; rel="prev""#;
        assert_eq!(next_link(header), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut s = "héllo".to_string();
        truncate(&mut s, 2);
        assert_eq!(s, "h");
    }
}
