//! Behaviour of the file-backed store across connections and threads.

use std::sync::Arc;
use std::thread;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use branchpulse_core::{review_fingerprint, BranchKey, ReviewState};
use branchpulse_store::{BranchFilter, ClosingUpdate, EntityStore, NewBranch, SqliteStore};

fn new_branch(name: &str, repo: &str) -> NewBranch {
    let key = BranchKey::new(name, repo);
    let review = ReviewState::default();
    NewBranch {
        fingerprint: review_fingerprint(&key, &review),
        key,
        creator: "Alice".into(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        review,
    }
}

#[test]
fn rows_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("branch_tracking.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.upsert_new(&new_branch("feature/a", "api")).unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let row = store
        .get(&BranchKey::new("feature/a", "api"))
        .unwrap()
        .expect("row persisted");
    assert_eq!(row.creator, "Alice");
    assert_eq!(
        row.created_at,
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    );
    assert!(row.fingerprint.is_some());
}

#[test]
fn concurrent_upserts_of_one_key_leave_one_row() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut branch = new_branch("feature/race", "api");
                branch.creator = format!("writer-{i}");
                store.upsert_new(&branch).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.count().unwrap(), 1);
    let rows = store.list_branches(&BranchFilter::default()).unwrap();
    assert!(rows[0].creator.starts_with("writer-"));
}

#[test]
fn closing_update_for_unknown_key_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("db.sqlite")).unwrap();
    store.upsert_new(&new_branch("feature/a", "api")).unwrap();

    let key = BranchKey::new("feature/a", "web");
    let updated = store
        .update_closing(&ClosingUpdate {
            fingerprint: review_fingerprint(&key, &ReviewState::default()),
            key,
            review: ReviewState::default(),
        })
        .unwrap();

    assert!(!updated);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn existing_database_with_legacy_layout_opens() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE branches (
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
             INSERT INTO branches (branch_name, repo_name, creator, created_at, pr_opened_at,
                                   merged_at, reviewers, details_hash)
             VALUES ('old', 'api', 'Bob', '2023-01-01T00:00:00Z', '2023-01-02T00:00:00Z',
                     '2023-01-03T00:00:00Z', 'alice,carol', 'abc');",
        )
        .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let row = store.get(&BranchKey::new("old", "api")).unwrap().unwrap();
    assert!(row.review.is_terminal());
    assert_eq!(row.review.reviewers.len(), 2);
    assert!(store.list_unmerged().unwrap().is_empty());
}

#[rstest::rstest]
#[case("", "api")]
#[case("feature/a", "")]
#[case("", "")]
fn writes_with_malformed_keys_are_rejected(#[case] branch: &str, #[case] repo: &str) {
    let store = SqliteStore::open_in_memory().unwrap();
    let err = store.upsert_new(&new_branch(branch, repo)).unwrap_err();
    assert!(
        matches!(err, branchpulse_store::StoreError::InvalidKey { .. }),
        "got: {err}"
    );
    assert_eq!(store.count().unwrap(), 0);
}
