//! Change-detection fingerprints.
//!
//! A fingerprint is the hex SHA-256 of an ordered tuple of field values. Each
//! field is framed as a one-byte tag followed (for text) by a little-endian
//! `u64` length and the UTF-8 bytes, so `("ab", "c")` and `("a", "bc")` never
//! collide and `None` never equals `Some("")`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{format_timestamp, BranchKey, ReviewState, ReviewerSet};

const TAG_NULL: u8 = 0x00;
const TAG_TEXT: u8 = 0x01;

/// Hex-encoded SHA-256 digest (64 chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One element of the fingerprinted tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Null,
    Text(&'a str),
}

impl<'a> From<&'a str> for FieldValue<'a> {
    fn from(s: &'a str) -> Self {
        FieldValue::Text(s)
    }
}

impl<'a> From<Option<&'a str>> for FieldValue<'a> {
    fn from(s: Option<&'a str>) -> Self {
        s.map_or(FieldValue::Null, FieldValue::Text)
    }
}

/// Hash an ordered tuple of fields.
pub fn fingerprint(fields: &[FieldValue<'_>]) -> Fingerprint {
    let mut h = Sha256::new();
    for field in fields {
        match field {
            FieldValue::Null => h.update([TAG_NULL]),
            FieldValue::Text(text) => {
                h.update([TAG_TEXT]);
                h.update((text.len() as u64).to_le_bytes());
                h.update(text.as_bytes());
            }
        }
    }
    Fingerprint(hex::encode(h.finalize()))
}

/// Fingerprint of a branch's reconcilable state:
/// `(branch, repo, pr_opened_at, merger, merged_at, reviewers)`.
///
/// Creator and creation time are excluded: they are immutable once stored and
/// unavailable once a branch ref is deleted, so the live and backlog phases
/// both compute this same digest.
pub fn review_fingerprint(key: &BranchKey, state: &ReviewState) -> Fingerprint {
    let pr_opened_at = state.pr_opened_at.as_ref().map(format_timestamp);
    let merged_at = state.merged_at.as_ref().map(format_timestamp);
    let reviewers = canonical_reviewers(&state.reviewers);
    fingerprint(&[
        key.branch.0.as_str().into(),
        key.repo.0.as_str().into(),
        opt_ts(&pr_opened_at),
        state.merger.as_deref().into(),
        opt_ts(&merged_at),
        reviewers.as_str().into(),
    ])
}

fn opt_ts(ts: &Option<String>) -> FieldValue<'_> {
    ts.as_deref().into()
}

fn canonical_reviewers(reviewers: &ReviewerSet) -> String {
    reviewers.to_delimited()
}
