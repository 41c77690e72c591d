//! Runtime file locations under `~/.branchpulse/`.

use std::path::{Path, PathBuf};

pub const DAEMON_LOG: &str = "daemon.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn branchpulse_root(home: &Path) -> PathBuf {
    branchpulse_core::config::branchpulse_dir_at(home)
}

pub fn run_dir(home: &Path) -> PathBuf {
    branchpulse_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    branchpulse_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    branchpulse_root(home).join("logs")
}

pub fn log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_LOG)
}

pub fn pid_path(home: &Path) -> PathBuf {
    run_dir(home).join("daemon.pid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_files_live_under_branchpulse_dir() {
        let home = Path::new("/home/me");
        assert_eq!(socket_path(home), Path::new("/home/me/.branchpulse/daemon.sock"));
        assert_eq!(pid_path(home), Path::new("/home/me/.branchpulse/run/daemon.pid"));
        assert_eq!(log_path(home), Path::new("/home/me/.branchpulse/logs/daemon.log"));
    }
}
