//! branchpulse core library: domain types, fingerprints, configuration.
//!
//! - [`types`]: newtypes and the tracked-branch record
//! - [`fingerprint`]: change-detection digests
//! - [`config`]: load / save / validate `~/.branchpulse/config.yaml`
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use fingerprint::{review_fingerprint, Fingerprint};
pub use types::{
    format_timestamp, parse_timestamp, BranchKey, BranchName, RepoName, ReviewState, ReviewerSet,
    TrackedBranch,
};
