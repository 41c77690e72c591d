pub mod branches;
pub mod daemon;
pub mod init;
pub mod stats;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use branchpulse_core::{config, Config};

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub fn load_config(home: &Path) -> Result<Config> {
    config::load_at(home).context("failed to load config; run `branchpulse init` first")
}
