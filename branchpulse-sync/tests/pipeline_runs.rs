mod common;

use branchpulse_core::{Config, RepoName};
use branchpulse_sync::{run, SyncError, SyncScope};

use common::{init_logging, BrokenRepoStore, CountingStore, FakeSource};

fn config(repos: &[&str]) -> Config {
    Config::new("acme", repos.iter().map(|r| RepoName::from(*r)).collect())
}

#[test]
fn failing_repository_does_not_block_the_next_one() {
    init_logging();
    let source = FakeSource::new();
    source.create_branch("broken", "feature/a", 1);
    source.create_branch("api", "feature/b", 1);
    let store = BrokenRepoStore::new("broken");

    let runs = run(
        &config(&["broken", "api"]),
        &source,
        &store,
        &SyncScope::All,
        false,
    )
    .unwrap();

    assert_eq!(runs.len(), 2);
    assert!(matches!(runs[0].result, Err(SyncError::Store(_))));
    let api = runs[1].result.as_ref().unwrap();
    assert_eq!(api.written(), 1);
}

#[test]
fn single_repository_scope_touches_only_that_repository() {
    let source = FakeSource::new();
    source.create_branch("api", "feature/a", 1);
    source.create_branch("web", "feature/b", 1);
    let store = CountingStore::new();

    let runs = run(
        &config(&["api", "web"]),
        &source,
        &store,
        &SyncScope::Repository(RepoName::from("web")),
        false,
    )
    .unwrap();

    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].repo, RepoName::from("web"));
    assert_eq!(store.inner.count().unwrap(), 1);
}

#[test]
fn configured_trunk_branch_is_excluded() {
    let source = FakeSource::new();
    source.create_branch("api", "develop", 1);
    source.create_branch("api", "main", 1);
    let store = CountingStore::new();
    let mut config = config(&["api"]);
    config.trunk_branch = "develop".into();

    let runs = run(&config, &source, &store, &SyncScope::All, false).unwrap();
    let pass = runs[0].result.as_ref().unwrap();
    assert_eq!(pass.outcomes.len(), 2);
    assert!(pass.outcomes.iter().all(|o| o.key.branch.0 == "main"));
}

#[test]
fn dry_run_reports_without_writing() {
    let source = FakeSource::new();
    source.create_branch("api", "feature/a", 1);
    let store = CountingStore::new();

    let runs = run(&config(&["api"]), &source, &store, &SyncScope::All, true).unwrap();
    assert_eq!(runs[0].result.as_ref().unwrap().would_write(), 1);
    assert_eq!(store.writes(), 0);
}
