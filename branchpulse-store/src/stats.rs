//! Read-only time-series queries over the `branches` table.
//!
//! Every metric is evaluated "as of" an instant: a row only counts once the
//! events it depends on had happened by then. Durations are reported in
//! fractional days and default to `0.0` when no row qualifies.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::Serialize;

use branchpulse_core::format_timestamp;

use crate::error::StoreError;
use crate::sqlite::SqliteStore;

/// All four metrics at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub as_of: DateTime<Utc>,
    pub open_branches: u64,
    pub average_branch_lifetime_days: f64,
    pub average_review_lifetime_days: f64,
    pub average_time_to_open_review_days: f64,
}

/// Metric queries borrowing an open store.
pub struct Metrics<'a> {
    store: &'a SqliteStore,
}

impl<'a> Metrics<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Branches created by `as_of` and not merged by then.
    pub fn open_branches(&self, as_of: DateTime<Utc>) -> Result<u64, StoreError> {
        let as_of = format_timestamp(&as_of);
        let n: i64 = self.store.with_conn("count open branches", |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM branches \
                 WHERE created_at <= ?1 AND (merged_at IS NULL OR merged_at > ?1)",
                params![as_of],
                |row| row.get(0),
            )
        })?;
        Ok(n.max(0) as u64)
    }

    /// Mean creation-to-merge time of branches merged by `as_of`.
    pub fn average_branch_lifetime(&self, as_of: DateTime<Utc>) -> Result<f64, StoreError> {
        self.average_days(
            "average branch lifetime",
            "SELECT AVG(julianday(merged_at) - julianday(created_at)) FROM branches \
             WHERE created_at <= ?1 AND merged_at <= ?1",
            as_of,
        )
    }

    /// Mean PR-open-to-merge time of pull requests merged by `as_of`.
    pub fn average_review_lifetime(&self, as_of: DateTime<Utc>) -> Result<f64, StoreError> {
        self.average_days(
            "average review lifetime",
            "SELECT AVG(julianday(merged_at) - julianday(pr_opened_at)) FROM branches \
             WHERE pr_opened_at <= ?1 AND merged_at <= ?1",
            as_of,
        )
    }

    /// Mean creation-to-PR-open time of branches with a PR opened by `as_of`.
    pub fn average_time_to_open_review(&self, as_of: DateTime<Utc>) -> Result<f64, StoreError> {
        self.average_days(
            "average time to open review",
            "SELECT AVG(julianday(pr_opened_at) - julianday(created_at)) FROM branches \
             WHERE created_at <= ?1 AND pr_opened_at <= ?1",
            as_of,
        )
    }

    pub fn snapshot(&self, as_of: DateTime<Utc>) -> Result<MetricsSnapshot, StoreError> {
        Ok(MetricsSnapshot {
            as_of,
            open_branches: self.open_branches(as_of)?,
            average_branch_lifetime_days: self.average_branch_lifetime(as_of)?,
            average_review_lifetime_days: self.average_review_lifetime(as_of)?,
            average_time_to_open_review_days: self.average_time_to_open_review(as_of)?,
        })
    }

    /// One snapshot per day for the `days` days ending at `end`, oldest first.
    pub fn daily_series(
        &self,
        end: DateTime<Utc>,
        days: u32,
    ) -> Result<Vec<MetricsSnapshot>, StoreError> {
        (0..days)
            .rev()
            .map(|back| self.snapshot(end - Duration::days(i64::from(back))))
            .collect()
    }

    fn average_days(
        &self,
        op: &'static str,
        sql: &str,
        as_of: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let as_of = format_timestamp(&as_of);
        let avg: Option<f64> = self
            .store
            .with_conn(op, |conn| conn.query_row(sql, params![as_of], |row| row.get(0)))?;
        Ok(avg.unwrap_or(0.0))
    }
}
