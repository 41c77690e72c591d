//! `branchpulse branches`: dump tracked rows.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use branchpulse_core::{format_timestamp, RepoName, TrackedBranch};
use branchpulse_store::{BranchFilter, SqliteStore};

/// Arguments for `branchpulse branches`.
#[derive(Args, Debug)]
pub struct BranchesArgs {
    /// Only rows of this repository.
    #[arg(long)]
    pub repo: Option<String>,

    /// Only branches that are not merged yet.
    #[arg(long)]
    pub open: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct BranchRow {
    #[tabled(rename = "repository")]
    repo: String,
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "creator")]
    creator: String,
    #[tabled(rename = "created")]
    created_at: String,
    #[tabled(rename = "pr opened")]
    pr_opened_at: String,
    #[tabled(rename = "merged")]
    merged_at: String,
    #[tabled(rename = "reviewers")]
    reviewers: String,
}

impl From<&TrackedBranch> for BranchRow {
    fn from(row: &TrackedBranch) -> Self {
        let ts = |t: &Option<chrono::DateTime<chrono::Utc>>| {
            t.as_ref().map(format_timestamp).unwrap_or_else(|| "-".into())
        };
        Self {
            repo: row.key.repo.0.clone(),
            branch: row.key.branch.0.clone(),
            creator: row.creator.clone(),
            created_at: format_timestamp(&row.created_at),
            pr_opened_at: ts(&row.review.pr_opened_at),
            merged_at: ts(&row.review.merged_at),
            reviewers: if row.review.reviewers.is_empty() {
                "-".into()
            } else {
                row.review.reviewers.to_delimited()
            },
        }
    }
}

impl BranchesArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let config = super::load_config(&home)?;
        let path = config.database_path_at(&home);
        let store = SqliteStore::open(&path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        let filter = BranchFilter {
            repo: self.repo.as_deref().map(RepoName::from),
            open_only: self.open,
        };
        let rows = store
            .list_branches(&filter)
            .context("failed to list branches")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize branches JSON")?
            );
            return Ok(());
        }

        if rows.is_empty() {
            println!("No branches tracked yet. Run `branchpulse sync --all` first.");
            return Ok(());
        }

        let open = rows.iter().filter(|r| !r.review.is_terminal()).count();
        println!("{} branches | {open} open", rows.len());
        let mut table = Table::new(rows.iter().map(BranchRow::from));
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
