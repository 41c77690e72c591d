use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use chrono::{DateTime, TimeZone, Utc};
use predicates::str::contains;
use tempfile::TempDir;

use branchpulse_core::{config, review_fingerprint, BranchKey, Config, RepoName, ReviewState};
use branchpulse_store::{EntityStore, NewBranch, SqliteStore};

fn branchpulse_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("branchpulse"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("GITHUB_TOKEN")
        .env_remove("ORG_NAME")
        .env_remove("REPOSITORIES")
        .env_remove("RUST_LOG");
    cmd
}

fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, n, 12, 0, 0).unwrap()
}

/// Config pointing at a closed local port so no pass reaches the network.
fn write_offline_config(home: &Path, repos: &[&str]) -> Config {
    let mut config = Config::new("acme", repos.iter().map(|r| RepoName::from(*r)).collect());
    config.api_base_url = "http://127.0.0.1:9".into();
    config.max_attempts = 1;
    config.request_timeout_secs = 2;
    config::save_at(home, &config).expect("save config");
    config
}

fn seed(home: &Path, config: &Config, branch: &str, created: u32, merged: Option<u32>) {
    let store = SqliteStore::open(&config.database_path_at(home)).expect("open store");
    let key = BranchKey::new(branch, "api");
    let review = ReviewState {
        pr_opened_at: merged.map(|_| day(created)),
        merger: None,
        merged_at: merged.map(day),
        reviewers: ["bob"].into_iter().collect(),
    };
    store
        .upsert_new(&NewBranch {
            fingerprint: review_fingerprint(&key, &review),
            key,
            creator: "Alice".into(),
            created_at: day(created),
            review,
        })
        .expect("seed row");
}

#[test]
fn init_writes_config_from_flags_and_env() {
    let home = TempDir::new().expect("home");

    branchpulse_cmd(home.path())
        .env("REPOSITORIES", "api,web")
        .args(["init", "--org", "acme", "--interval", "900"])
        .assert()
        .success()
        .stdout(contains("Tracking 2 repositories in 'acme'"));

    let config = config::load_at(home.path()).expect("load");
    assert_eq!(config.organization, "acme");
    assert_eq!(
        config.repositories,
        vec![RepoName::from("api"), RepoName::from("web")]
    );
    assert_eq!(config.poll_interval_secs, 900);
    assert!(!fs::read_to_string(config::config_path_at(home.path()))
        .expect("read yaml")
        .contains("token"));
}

#[test]
fn init_without_repositories_is_rejected() {
    let home = TempDir::new().expect("home");
    branchpulse_cmd(home.path())
        .args(["init", "--org", "acme"])
        .assert()
        .failure()
        .stderr(contains("at least one repository"));
    assert!(!config::config_path_at(home.path()).exists());
}

#[test]
fn commands_without_config_point_at_init() {
    let home = TempDir::new().expect("home");
    branchpulse_cmd(home.path())
        .args(["branches"])
        .assert()
        .failure()
        .stderr(contains("branchpulse init"));
}

#[test]
fn sync_rejects_unconfigured_repository() {
    let home = TempDir::new().expect("home");
    write_offline_config(home.path(), &["api"]);

    branchpulse_cmd(home.path())
        .args(["sync", "docs"])
        .assert()
        .failure()
        .stderr(contains("'docs' is not configured"));
}

#[test]
fn sync_reports_listing_failure_and_skipped_backlog() {
    let home = TempDir::new().expect("home");
    let config = write_offline_config(home.path(), &["api"]);
    seed(home.path(), &config, "feature/open", 1, None);

    branchpulse_cmd(home.path())
        .args(["sync", "--all", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("[dry-run]"))
        .stdout(contains("live listing failed"))
        .stdout(contains("feature/open (backlog)"));
}

#[test]
fn branches_lists_rows_as_json_and_filters_open() {
    let home = TempDir::new().expect("home");
    let config = write_offline_config(home.path(), &["api"]);
    seed(home.path(), &config, "feature/open", 1, None);
    seed(home.path(), &config, "feature/done", 2, Some(3));

    let assert = branchpulse_cmd(home.path())
        .args(["branches", "--json"])
        .assert()
        .success();
    let rows: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(rows.as_array().expect("array").len(), 2);

    let assert = branchpulse_cmd(home.path())
        .args(["branches", "--open", "--json"])
        .assert()
        .success();
    let rows: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json");
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["key"]["branch"], serde_json::json!("feature/open"));

    branchpulse_cmd(home.path())
        .args(["branches"])
        .assert()
        .success()
        .stdout(contains("2 branches | 1 open"))
        .stdout(contains("feature/done"));
}

#[test]
fn stats_reports_metrics_as_of_a_date() {
    let home = TempDir::new().expect("home");
    let config = write_offline_config(home.path(), &["api"]);
    seed(home.path(), &config, "A", 1, Some(3));
    seed(home.path(), &config, "B", 2, None);

    let assert = branchpulse_cmd(home.path())
        .args(["stats", "--as-of", "2024-03-04T12:00:00Z", "--days", "2", "--json"])
        .assert()
        .success();
    let series: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json");
    let series = series.as_array().expect("array");
    assert_eq!(series.len(), 2);
    assert_eq!(series[1]["open_branches"], serde_json::json!(1));
    let lifetime = series[1]["average_branch_lifetime_days"]
        .as_f64()
        .expect("lifetime");
    assert!((lifetime - 2.0).abs() < 1e-9, "lifetime was {lifetime}");

    branchpulse_cmd(home.path())
        .args(["stats", "--as-of", "tomorrow"])
        .assert()
        .failure()
        .stderr(contains("YYYY-MM-DD"));
}

#[test]
fn daemon_status_and_stop_without_daemon() {
    let home = TempDir::new().expect("home");

    branchpulse_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));

    branchpulse_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));

    branchpulse_cmd(home.path())
        .args(["daemon", "logs"])
        .assert()
        .success()
        .stdout(contains("log file not found"));
}
