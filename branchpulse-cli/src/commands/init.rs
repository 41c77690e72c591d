//! `branchpulse init --org <org> --repo <repo>...`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use branchpulse_core::{config, Config, ConfigError, RepoName};

/// Create or update `~/.branchpulse/config.yaml`. Flags left out keep the
/// value already on disk.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// GitHub organization that owns the repositories.
    #[arg(long, env = "ORG_NAME")]
    pub org: Option<String>,

    /// Repository to track; repeat or comma-separate for several.
    #[arg(long = "repo", env = "REPOSITORIES", value_delimiter = ',')]
    pub repos: Vec<String>,

    /// Trunk branch excluded from tracking.
    #[arg(long)]
    pub trunk: Option<String>,

    /// Seconds between daemon passes.
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// SQLite database path (default ~/.branchpulse/branch_tracking.db).
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// REST API base URL, for GitHub Enterprise.
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let existing = match config::load_at(&home) {
            Ok(config) => Some(config),
            Err(ConfigError::ConfigNotFound { .. }) => None,
            Err(err) => return Err(err).context("failed to read existing config"),
        };

        let config = self.apply(existing)?;
        config.validate().context("refusing to write invalid config")?;
        let path = config::save_at(&home, &config).context("failed to save config")?;

        println!(
            "✓ Tracking {} repositories in '{}'",
            config.repositories.len(),
            config.organization
        );
        println!("  Saved to: {}", path.display());
        Ok(())
    }

    fn apply(self, existing: Option<Config>) -> Result<Config> {
        let repos: Vec<RepoName> = self
            .repos
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(RepoName::from)
            .collect();

        let mut config = match existing {
            Some(mut config) => {
                if let Some(org) = self.org {
                    config.organization = org;
                }
                if !repos.is_empty() {
                    config.repositories = repos;
                }
                config
            }
            None => {
                let Some(org) = self.org else {
                    bail!("--org (or ORG_NAME) is required on first init");
                };
                Config::new(org, repos)
            }
        };

        if let Some(trunk) = self.trunk {
            config.trunk_branch = trunk;
        }
        if let Some(interval) = self.interval {
            config.poll_interval_secs = interval;
        }
        if let Some(database) = self.database {
            config.database = Some(database);
        }
        if let Some(api_url) = self.api_url {
            config.api_base_url = api_url;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(org: Option<&str>, repos: &[&str]) -> InitArgs {
        InitArgs {
            org: org.map(str::to_string),
            repos: repos.iter().map(|r| r.to_string()).collect(),
            trunk: None,
            interval: None,
            database: None,
            api_url: None,
        }
    }

    #[test]
    fn first_init_needs_an_organization() {
        assert!(args(None, &["api"]).apply(None).is_err());
    }

    #[test]
    fn flags_override_only_what_they_name() {
        let mut existing = Config::new("acme", vec![RepoName::from("api")]);
        existing.poll_interval_secs = 600;

        let mut update = args(None, &["web", " ", "docs"]);
        update.trunk = Some("develop".into());
        let config = update.apply(Some(existing)).unwrap();

        assert_eq!(config.organization, "acme");
        assert_eq!(
            config.repositories,
            vec![RepoName::from("web"), RepoName::from("docs")]
        );
        assert_eq!(config.trunk_branch, "develop");
        assert_eq!(config.poll_interval_secs, 600);
    }
}
