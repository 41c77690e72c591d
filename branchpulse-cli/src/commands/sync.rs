//! `branchpulse sync`: run one reconciliation pass in the foreground.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use branchpulse_core::RepoName;
use branchpulse_sync::{
    pipeline::{self, SyncScope},
    Action, Phase, RepoPassResult, RepoRun,
};

/// Arguments for `branchpulse sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Repository to reconcile (omit when using `--all`).
    pub repository: Option<String>,

    /// Reconcile every configured repository.
    #[arg(long, conflicts_with = "repository")]
    pub all: bool,

    /// Report what would be written without touching the database.
    #[arg(long)]
    pub dry_run: bool,

    /// GitHub token; requests are unauthenticated when unset.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let config = super::load_config(&home)?;
        branchpulse_daemon::init_tracing(None).context("failed to install logger")?;

        let scope = match &self.repository {
            Some(name) => SyncScope::Repository(RepoName::from(name.as_str())),
            None if self.all => SyncScope::All,
            None => bail!("provide a repository name or use --all"),
        };
        let runs = pipeline::run_configured(&home, &config, self.token, &scope, self.dry_run)
            .context("sync failed")?;

        for run in &runs {
            print_run(run, self.dry_run);
        }

        let failed = runs.iter().filter(|r| r.result.is_err()).count();
        if failed > 0 {
            bail!("{failed} of {} repositories failed", runs.len());
        }
        Ok(())
    }
}

fn print_run(run: &RepoRun, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let pass = match &run.result {
        Ok(pass) => pass,
        Err(err) => {
            println!("{prefix}{} '{}' — {err}", "✗".red().bold(), run.repo);
            return;
        }
    };

    print_summary(prefix, pass);
    if let Some(err) = &pass.listing_error {
        println!("  {} live listing failed: {err}", "!".yellow().bold());
    }
    for outcome in &pass.outcomes {
        let phase = match outcome.phase {
            Phase::Live => "live",
            Phase::Backlog => "backlog",
        };
        match &outcome.action {
            Action::Written => println!("  ✎  {} ({phase})", outcome.key.branch),
            Action::WouldWrite => println!("  ~  {} ({phase})", outcome.key.branch),
            Action::Unchanged => println!("  ·  {} ({phase})", outcome.key.branch),
            Action::Skipped(reason) => println!(
                "  {}  {} ({phase}): {reason}",
                "!".yellow().bold(),
                outcome.key.branch
            ),
        }
    }
}

fn print_summary(prefix: &str, pass: &RepoPassResult) {
    if pass.outcomes.is_empty() {
        println!("{prefix}✓ '{}' — nothing to do", pass.repo);
        return;
    }
    println!(
        "{prefix}✓ '{}' reconciled ({} written, {} unchanged, {} skipped)",
        pass.repo,
        pass.written() + pass.would_write(),
        pass.unchanged(),
        pass.skipped()
    );
}
