//! Control-socket messages and the blocking client used by the CLI.
//!
//! One JSON object per line in each direction, tagged by `cmd` on the way in
//! and by `result` on the way out:
//!
//! ```text
//! → {"cmd":"status"}
//! → {"cmd":"sync","repository":"api"}
//! → {"cmd":"stop"}
//! ← {"result":"status","pid":4242,"organization":"acme",…}
//! ← {"result":"synced","target":"api","written":3,…}
//! ← {"result":"stopping"}
//! ← {"result":"error","message":"…"}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchpulse_core::RepoName;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Status,
    /// Run a pass now; every configured repository when `repository` is absent.
    Sync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repository: Option<RepoName>,
    },
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DaemonResponse {
    Status(DaemonStatus),
    Synced(SyncSummary),
    Stopping,
    Error { message: String },
}

/// Snapshot answered to `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub organization: String,
    pub poll_interval_secs: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub repositories: Vec<RepoStatus>,
    pub socket: String,
    pub database: String,
}

/// Last pass result of one repository, as the daemon remembers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStatus {
    pub repository: RepoName,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl RepoStatus {
    pub fn never_run(repository: RepoName) -> Self {
        Self {
            repository,
            last_pass_at: None,
            last_error: None,
            written: 0,
            unchanged: 0,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub repository: RepoName,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Totals of one pass over a scope, answered to `sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Repository name, or `all`.
    pub target: String,
    /// What triggered the pass: `ticker` or `socket`.
    pub trigger: String,
    pub repositories: Vec<RepoSummary>,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Send one request and read one response line.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = match UnixStream::connect(&socket) {
        Ok(stream) => stream,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
            ) =>
        {
            return Err(DaemonError::DaemonNotRunning { socket });
        }
        Err(err) => return Err(io_err(&socket, err)),
    };

    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| io_err(&socket, e))?;

    let mut reply = String::new();
    let read = BufReader::new(stream)
        .read_line(&mut reply)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}

/// Query the daemon, retrying briefly while its socket comes up.
pub fn request_status(home: &Path) -> Result<DaemonStatus, DaemonError> {
    let mut attempt = 1;
    let response = loop {
        match send_request(home, &DaemonRequest::Status) {
            Err(DaemonError::DaemonNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                attempt += 1;
                sleep(STATUS_RETRY_DELAY);
            }
            other => break other?,
        }
    };

    match response {
        DaemonResponse::Status(status) => Ok(status),
        other => Err(unexpected("status", other)),
    }
}

pub fn request_sync(
    home: &Path,
    repository: Option<RepoName>,
) -> Result<SyncSummary, DaemonError> {
    match send_request(home, &DaemonRequest::Sync { repository })? {
        DaemonResponse::Synced(summary) => Ok(summary),
        other => Err(unexpected("sync", other)),
    }
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    match send_request(home, &DaemonRequest::Stop)? {
        DaemonResponse::Stopping => Ok(()),
        other => Err(unexpected("stop", other)),
    }
}

fn unexpected(cmd: &str, response: DaemonResponse) -> DaemonError {
    match response {
        DaemonResponse::Error { message } => DaemonError::Protocol(message),
        other => DaemonError::Protocol(format!("unexpected reply to {cmd}: {other:?}")),
    }
}
