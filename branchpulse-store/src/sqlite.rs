//! SQLite implementation of [`EntityStore`].
//!
//! # Layout
//!
//! One table, `branches`, with a synthetic primary key and a uniqueness
//! constraint on `(branch_name, repo_name)`. Timestamps are RFC 3339 UTC text
//! (`2024-05-01T10:00:00Z`); reviewers are the comma-delimited sorted set;
//! the fingerprint lives in `details_hash`. A database created by an earlier
//! tool with the same layout opens unchanged.
//!
//! # Schema versioning
//!
//! Tracked through `PRAGMA user_version`. Add a `migrate_vN` step and bump
//! [`SCHEMA_VERSION`] when the layout changes.
//!
//! # Concurrency
//!
//! `rusqlite::Connection` is not `Sync`, so it sits behind a `Mutex`. Each
//! write is a single statement executed under that lock, which makes every
//! per-key write atomic.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use branchpulse_core::{
    format_timestamp, parse_timestamp, BranchKey, Fingerprint, RepoName, ReviewState, ReviewerSet,
    TrackedBranch,
};

use crate::error::{io_err, unavailable, StoreError};
use crate::{ensure_key, ClosingUpdate, EntityStore, NewBranch};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

const SELECT_COLUMNS: &str = "branch_name, repo_name, creator, created_at, pr_opened_at, \
                              merger, merged_at, reviewers, details_hash";

/// Row selection for [`SqliteStore::list_branches`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchFilter {
    /// Restrict to one repository.
    pub repo: Option<RepoName>,
    /// Only rows whose `merged_at` is unset.
    pub open_only: bool,
}

/// SQLite-backed entity store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating its parent directory.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
        }
        let conn = Connection::open(path).map_err(unavailable("open database"))?;
        let store = Self::from_connection(conn)?;
        tracing::debug!("opened branch store at {}", path.display());
        Ok(store)
    }

    /// An empty database that lives as long as the returned store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable("open database"))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        configure(&conn)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the connection lock held.
    pub(crate) fn with_conn<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self.lock(op)?;
        f(&conn).map_err(unavailable(op))
    }

    fn lock(&self, op: &'static str) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned { op })
    }

    /// Full row for `key`.
    pub fn get(&self, key: &BranchKey) -> Result<Option<TrackedBranch>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM branches WHERE branch_name = ?1 AND repo_name = ?2"
        );
        let raw = self.with_conn("get branch", |conn| {
            conn.query_row(&sql, params![key.branch.0, key.repo.0], RawRow::from_row)
                .optional()
        })?;
        raw.map(RawRow::into_branch).transpose()
    }

    /// Rows matching `filter`, ordered by repository then creation time.
    pub fn list_branches(&self, filter: &BranchFilter) -> Result<Vec<TrackedBranch>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM branches \
             WHERE (?1 IS NULL OR repo_name = ?1) AND (?2 = 0 OR merged_at IS NULL) \
             ORDER BY repo_name, created_at, branch_name"
        );
        let repo = filter.repo.as_ref().map(|r| r.0.clone());
        let rows = self.with_conn("list branches", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![repo, filter.open_only as i64], RawRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(RawRow::into_branch).collect()
    }

    /// Number of rows in the table.
    pub fn count(&self) -> Result<u64, StoreError> {
        self.with_conn("count branches", |conn| {
            conn.query_row("SELECT COUNT(*) FROM branches", [], |row| row.get::<_, i64>(0))
        })
        .map(|n| n.max(0) as u64)
    }
}

impl EntityStore for SqliteStore {
    fn get_fingerprint(&self, key: &BranchKey) -> Result<Option<Fingerprint>, StoreError> {
        let hash: Option<Option<String>> = self.with_conn("fetch fingerprint", |conn| {
            conn.query_row(
                "SELECT details_hash FROM branches WHERE branch_name = ?1 AND repo_name = ?2",
                params![key.branch.0, key.repo.0],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(hash.flatten().map(Fingerprint))
    }

    fn list_unmerged(&self) -> Result<Vec<BranchKey>, StoreError> {
        self.with_conn("list unmerged", |conn| {
            let mut stmt = conn.prepare(
                "SELECT branch_name, repo_name FROM branches WHERE merged_at IS NULL \
                 ORDER BY repo_name, branch_name",
            )?;
            let keys = stmt
                .query_map([], |row| {
                    Ok(BranchKey::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
    }

    fn upsert_new(&self, branch: &NewBranch) -> Result<(), StoreError> {
        ensure_key(&branch.key)?;
        let review = ReviewColumns::from(&branch.review);
        self.with_conn("upsert branch", |conn| {
            conn.execute(
                "INSERT INTO branches (branch_name, repo_name, creator, created_at, pr_opened_at, \
                                       merger, merged_at, reviewers, details_hash) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(branch_name, repo_name) DO UPDATE SET \
                     pr_opened_at = excluded.pr_opened_at, \
                     merger = excluded.merger, \
                     merged_at = excluded.merged_at, \
                     reviewers = excluded.reviewers, \
                     details_hash = excluded.details_hash",
                params![
                    branch.key.branch.0,
                    branch.key.repo.0,
                    branch.creator,
                    format_timestamp(&branch.created_at),
                    review.pr_opened_at,
                    review.merger,
                    review.merged_at,
                    review.reviewers,
                    branch.fingerprint.0,
                ],
            )
        })?;
        tracing::debug!("upserted {}", branch.key);
        Ok(())
    }

    fn update_closing(&self, update: &ClosingUpdate) -> Result<bool, StoreError> {
        ensure_key(&update.key)?;
        let review = ReviewColumns::from(&update.review);
        let changed = self.with_conn("update closing branch", |conn| {
            conn.execute(
                "UPDATE branches \
                 SET pr_opened_at = ?1, merger = ?2, merged_at = ?3, reviewers = ?4, details_hash = ?5 \
                 WHERE branch_name = ?6 AND repo_name = ?7",
                params![
                    review.pr_opened_at,
                    review.merger,
                    review.merged_at,
                    review.reviewers,
                    update.fingerprint.0,
                    update.key.branch.0,
                    update.key.repo.0,
                ],
            )
        })?;
        if changed == 0 {
            tracing::debug!("no stored row for {}; closing update ignored", update.key);
        }
        Ok(changed > 0)
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

fn configure(conn: &Connection) -> Result<(), StoreError> {
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(unavailable("set journal_mode"))?;
    if !journal_mode.eq_ignore_ascii_case("wal") && !journal_mode.eq_ignore_ascii_case("memory") {
        tracing::warn!("SQLite kept journal_mode '{journal_mode}' instead of WAL");
    }
    conn.execute_batch("PRAGMA busy_timeout = 5000;")
        .map_err(unavailable("configure pragmas"))
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let current: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(unavailable("read schema version"))?;

    if current < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS branches (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 branch_name TEXT NOT NULL,
                 repo_name TEXT NOT NULL,
                 creator TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 pr_opened_at TEXT,
                 merger TEXT,
                 merged_at TEXT,
                 reviewers TEXT,
                 details_hash TEXT,
                 UNIQUE(branch_name, repo_name)
             );
             CREATE INDEX IF NOT EXISTS idx_branches_unmerged
                 ON branches(repo_name) WHERE merged_at IS NULL;",
        )
        .map_err(unavailable("migration v1"))?;
    }

    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(unavailable("update schema version"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Text form of the mutable columns.
struct ReviewColumns {
    pr_opened_at: Option<String>,
    merger: Option<String>,
    merged_at: Option<String>,
    reviewers: String,
}

impl From<&ReviewState> for ReviewColumns {
    fn from(review: &ReviewState) -> Self {
        Self {
            pr_opened_at: review.pr_opened_at.as_ref().map(format_timestamp),
            merger: review.merger.clone(),
            merged_at: review.merged_at.as_ref().map(format_timestamp),
            reviewers: review.reviewers.to_delimited(),
        }
    }
}

/// Row exactly as stored; parsed outside the rusqlite closure so parse
/// failures surface as [`StoreError::Corrupt`].
struct RawRow {
    branch_name: String,
    repo_name: String,
    creator: String,
    created_at: String,
    pr_opened_at: Option<String>,
    merger: Option<String>,
    merged_at: Option<String>,
    reviewers: Option<String>,
    details_hash: Option<String>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            branch_name: row.get(0)?,
            repo_name: row.get(1)?,
            creator: row.get(2)?,
            created_at: row.get(3)?,
            pr_opened_at: row.get(4)?,
            merger: row.get(5)?,
            merged_at: row.get(6)?,
            reviewers: row.get(7)?,
            details_hash: row.get(8)?,
        })
    }

    fn into_branch(self) -> Result<TrackedBranch, StoreError> {
        let key = BranchKey::new(self.branch_name, self.repo_name);
        let parse = |column: &'static str, value: &str| {
            parse_timestamp(value).map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
                column,
                value: value.to_string(),
            })
        };

        let created_at = parse("created_at", &self.created_at)?;
        let pr_opened_at = self
            .pr_opened_at
            .as_deref()
            .map(|v| parse("pr_opened_at", v))
            .transpose()?;
        let merged_at = self
            .merged_at
            .as_deref()
            .map(|v| parse("merged_at", v))
            .transpose()?;

        Ok(TrackedBranch {
            creator: self.creator,
            created_at,
            review: ReviewState {
                pr_opened_at,
                merger: self.merger,
                merged_at,
                reviewers: self
                    .reviewers
                    .as_deref()
                    .map(ReviewerSet::from_delimited)
                    .unwrap_or_default(),
            },
            fingerprint: self.details_hash.map(Fingerprint),
            key,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
