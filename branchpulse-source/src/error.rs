//! Error types for branchpulse-source.

use thiserror::Error;

/// All errors that can arise while talking to the hosting API.
///
/// Messages carry the request URL but never the credential.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The configured base URL cannot be used to build request paths.
    #[error("invalid API base URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The credential was rejected (401).
    #[error("unauthorized: {url} returned 401; check GITHUB_TOKEN")]
    Unauthorized { url: String },

    /// A non-retryable HTTP status.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// Retries were exhausted on a transient failure.
    #[error("giving up on {url} after {attempts} attempt(s): {reason}")]
    Retryable {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// The response body did not match the expected shape.
    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl SourceError {
    /// HTTP status for [`SourceError::Http`] and [`SourceError::Unauthorized`].
    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::Http { status, .. } => Some(*status),
            SourceError::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }

    pub(crate) fn malformed(url: &str, reason: impl Into<String>) -> Self {
        SourceError::Malformed {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
