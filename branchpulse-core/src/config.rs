//! Driver configuration file.
//!
//! # Storage layout
//!
//! ```text
//! ~/.branchpulse/
//!   config.yaml             (mode 0600)
//!   branch_tracking.db      (default store location)
//! ```
//!
//! Every function touching the filesystem takes the home directory
//! explicitly (`fn_at(home: &Path, …)`); callers resolve it once.
//!
//! The access token is never part of this file; it comes from the
//! environment at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::RepoName;

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_TRUNK_BRANCH: &str = "main";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_DATABASE_FILE: &str = "branch_tracking.db";

/// Contents of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub organization: String,
    #[serde(default)]
    pub repositories: Vec<RepoName>,
    /// Branch excluded from tracking in every repository.
    #[serde(default = "default_trunk_branch")]
    pub trunk_branch: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Store location; `<home>/.branchpulse/branch_tracking.db` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_trunk_branch() -> String {
    DEFAULT_TRUNK_BRANCH.to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Config {
    /// A config with every optional field at its default.
    pub fn new(organization: impl Into<String>, repositories: Vec<RepoName>) -> Self {
        Self {
            organization: organization.into(),
            repositories,
            trunk_branch: default_trunk_branch(),
            poll_interval_secs: default_poll_interval_secs(),
            database: None,
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolved store path: the configured one, or the default under `home`.
    pub fn database_path_at(&self, home: &Path) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| branchpulse_dir_at(home).join(DEFAULT_DATABASE_FILE))
    }

    /// Reject configurations the driver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.organization.trim().is_empty() {
            return Err(ConfigError::Invalid("organization must not be empty".into()));
        }
        if self.repositories.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one repository is required".into(),
            ));
        }
        if let Some(repo) = self.repositories.iter().find(|r| r.0.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "repository names must not be empty (got '{repo}')"
            )));
        }
        if self.trunk_branch.trim().is_empty() {
            return Err(ConfigError::Invalid("trunk_branch must not be empty".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.branchpulse/`; pure, no I/O.
pub fn branchpulse_dir_at(home: &Path) -> PathBuf {
    home.join(".branchpulse")
}

/// `<home>/.branchpulse/config.yaml`; pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    branchpulse_dir_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.branchpulse/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config to `<home>/.branchpulse/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    let dir = branchpulse_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    fn sample() -> Config {
        Config::new("acme", vec![RepoName::from("api"), RepoName::from("web")])
    }

    #[test]
    fn config_path_is_correct() {
        let home = make_home();
        assert!(config_path_at(home.path()).ends_with(".branchpulse/config.yaml"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = make_home();
        save_at(home.path(), &sample()).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, sample());
    }

    #[test]
    fn save_sets_restrictive_permissions() {
        let home = make_home();
        let path = save_at(home.path(), &sample()).expect("save");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
        assert!(!path.with_file_name("config.yaml.tmp").exists());
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let home = make_home();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "organization: acme\nrepositories: [api]\n").unwrap();

        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded.trunk_branch, "main");
        assert_eq!(loaded.poll_interval(), Duration::from_secs(3600));
        assert_eq!(loaded.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(
            loaded.database_path_at(home.path()),
            home.path().join(".branchpulse").join("branch_tracking.db")
        );
    }

    #[test]
    fn load_missing_config_returns_not_found() {
        let home = make_home();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigNotFound { .. }));
    }

    #[test]
    fn validate_rejects_unusable_values() {
        assert!(sample().validate().is_ok());

        let mut no_repos = sample();
        no_repos.repositories.clear();
        assert!(matches!(no_repos.validate(), Err(ConfigError::Invalid(_))));

        let mut zero_interval = sample();
        zero_interval.poll_interval_secs = 0;
        assert!(matches!(zero_interval.validate(), Err(ConfigError::Invalid(_))));

        let mut blank_org = sample();
        blank_org.organization = "  ".into();
        assert!(matches!(blank_org.validate(), Err(ConfigError::Invalid(_))));
    }
}
