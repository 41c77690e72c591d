#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use branchpulse_core::{BranchKey, BranchName, Fingerprint, RepoName, ReviewerSet};
use branchpulse_source::{BranchOrigin, PullRequest, SourceAdapter, SourceError};
use branchpulse_store::{ClosingUpdate, EntityStore, NewBranch, SqliteStore, StoreError};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, n, 12, 0, 0).unwrap()
}

type Key = (String, String);

fn key(repo: &str, branch: &str) -> Key {
    (repo.to_string(), branch.to_string())
}

fn failure(what: &str) -> SourceError {
    SourceError::Retryable {
        url: format!("https://api.test/{what}"),
        attempts: 3,
        reason: "HTTP 502".into(),
    }
}

#[derive(Default)]
struct World {
    live: HashMap<String, Vec<String>>,
    origins: HashMap<Key, BranchOrigin>,
    pulls: HashMap<Key, Vec<PullRequest>>,
    reviews: HashMap<(String, u64), Vec<String>>,
    failing: HashSet<Key>,
    failing_listings: HashSet<String>,
    failing_reviews: HashSet<(String, u64)>,
}

/// In-memory hosting service.
#[derive(Default)]
pub struct FakeSource {
    world: Mutex<World>,
    reviewer_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_branch(&self, repo: &str, branch: &str, created: u32) {
        let mut w = self.world.lock().unwrap();
        w.live
            .entry(repo.to_string())
            .or_default()
            .push(branch.to_string());
        w.origins.insert(
            key(repo, branch),
            BranchOrigin {
                creator: "Alice".into(),
                created_at: day(created),
            },
        );
    }

    pub fn delete_branch(&self, repo: &str, branch: &str) {
        let mut w = self.world.lock().unwrap();
        if let Some(branches) = w.live.get_mut(repo) {
            branches.retain(|b| b != branch);
        }
        w.origins.remove(&key(repo, branch));
    }

    pub fn open_pr(&self, repo: &str, branch: &str, number: u64, opened: u32) {
        let mut w = self.world.lock().unwrap();
        w.pulls.entry(key(repo, branch)).or_default().push(PullRequest {
            number,
            opened_at: day(opened),
            merged_at: None,
        });
    }

    pub fn merge_pr(&self, repo: &str, branch: &str, number: u64, merged: u32) {
        let mut w = self.world.lock().unwrap();
        if let Some(pr) = w
            .pulls
            .get_mut(&key(repo, branch))
            .and_then(|prs| prs.iter_mut().find(|p| p.number == number))
        {
            pr.merged_at = Some(day(merged));
        }
    }

    /// Replace the review list of a PR; order is preserved as given.
    pub fn set_reviews(&self, repo: &str, number: u64, logins: &[&str]) {
        let mut w = self.world.lock().unwrap();
        w.reviews.insert(
            (repo.to_string(), number),
            logins.iter().map(|l| l.to_string()).collect(),
        );
    }

    pub fn fail_branch(&self, repo: &str, branch: &str) {
        self.world.lock().unwrap().failing.insert(key(repo, branch));
    }

    pub fn heal_branch(&self, repo: &str, branch: &str) {
        self.world.lock().unwrap().failing.remove(&key(repo, branch));
    }

    pub fn fail_listing(&self, repo: &str) {
        self.world
            .lock()
            .unwrap()
            .failing_listings
            .insert(repo.to_string());
    }

    /// Make the reviewer lookup of one PR fail.
    pub fn fail_reviewers(&self, repo: &str, number: u64) {
        self.world
            .lock()
            .unwrap()
            .failing_reviews
            .insert((repo.to_string(), number));
    }

    pub fn reviewer_calls(&self) -> usize {
        self.reviewer_calls.load(Ordering::SeqCst)
    }
}

impl SourceAdapter for FakeSource {
    fn list_live_branches(&self, repo: &RepoName) -> Result<Vec<BranchName>, SourceError> {
        let w = self.world.lock().unwrap();
        if w.failing_listings.contains(&repo.0) {
            return Err(failure("branches"));
        }
        Ok(w
            .live
            .get(&repo.0)
            .map(|b| b.iter().map(|n| BranchName::from(n.as_str())).collect())
            .unwrap_or_default())
    }

    fn get_branch_origin(
        &self,
        repo: &RepoName,
        branch: &BranchName,
    ) -> Result<Option<BranchOrigin>, SourceError> {
        let w = self.world.lock().unwrap();
        let k = key(&repo.0, &branch.0);
        if w.failing.contains(&k) {
            return Err(failure("commits"));
        }
        Ok(w.origins.get(&k).cloned())
    }

    fn list_pull_requests(
        &self,
        repo: &RepoName,
        branch: &BranchName,
    ) -> Result<Vec<PullRequest>, SourceError> {
        let w = self.world.lock().unwrap();
        let k = key(&repo.0, &branch.0);
        if w.failing.contains(&k) {
            return Err(failure("pulls"));
        }
        let mut pulls = w.pulls.get(&k).cloned().unwrap_or_default();
        pulls.sort_by_key(|p| p.opened_at);
        Ok(pulls)
    }

    fn list_reviewers(&self, repo: &RepoName, pr_number: u64) -> Result<ReviewerSet, SourceError> {
        self.reviewer_calls.fetch_add(1, Ordering::SeqCst);
        let w = self.world.lock().unwrap();
        if w.failing_reviews.contains(&(repo.0.clone(), pr_number)) {
            return Err(failure("reviews"));
        }
        Ok(w
            .reviews
            .get(&(repo.0.clone(), pr_number))
            .map(|logins| logins.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// SQLite store that counts writes.
pub struct CountingStore {
    pub inner: SqliteStore,
    upserts: AtomicUsize,
    closings: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            upserts: AtomicUsize::new(0),
            closings: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.upserts.load(Ordering::SeqCst) + self.closings.load(Ordering::SeqCst)
    }

    pub fn closings(&self) -> usize {
        self.closings.load(Ordering::SeqCst)
    }
}

impl EntityStore for CountingStore {
    fn get_fingerprint(&self, key: &BranchKey) -> Result<Option<Fingerprint>, StoreError> {
        self.inner.get_fingerprint(key)
    }

    fn list_unmerged(&self) -> Result<Vec<BranchKey>, StoreError> {
        self.inner.list_unmerged()
    }

    fn upsert_new(&self, branch: &NewBranch) -> Result<(), StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_new(branch)
    }

    fn update_closing(&self, update: &ClosingUpdate) -> Result<bool, StoreError> {
        self.closings.fetch_add(1, Ordering::SeqCst);
        self.inner.update_closing(update)
    }
}

/// Store whose writes fail for one repository.
pub struct BrokenRepoStore {
    pub inner: SqliteStore,
    pub broken: &'static str,
}

impl BrokenRepoStore {
    pub fn new(broken: &'static str) -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            broken,
        }
    }

    fn check(&self, key: &BranchKey, op: &'static str) -> Result<(), StoreError> {
        if key.repo.0 == self.broken {
            Err(StoreError::LockPoisoned { op })
        } else {
            Ok(())
        }
    }
}

impl EntityStore for BrokenRepoStore {
    fn get_fingerprint(&self, key: &BranchKey) -> Result<Option<Fingerprint>, StoreError> {
        self.inner.get_fingerprint(key)
    }

    fn list_unmerged(&self) -> Result<Vec<BranchKey>, StoreError> {
        self.inner.list_unmerged()
    }

    fn upsert_new(&self, branch: &NewBranch) -> Result<(), StoreError> {
        self.check(&branch.key, "upsert branch")?;
        self.inner.upsert_new(branch)
    }

    fn update_closing(&self, update: &ClosingUpdate) -> Result<bool, StoreError> {
        self.check(&update.key, "update closing branch")?;
        self.inner.update_closing(update)
    }
}
