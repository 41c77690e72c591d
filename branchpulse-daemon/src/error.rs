use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime and its control protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] branchpulse_core::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] branchpulse_store::StoreError),

    #[error("source error: {0}")]
    Source(#[from] branchpulse_source::SourceError),

    #[error("sync error: {0}")]
    Sync(#[from] branchpulse_sync::SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    /// A pass was abandoned because the daemon is stopping.
    #[error("daemon is shutting down")]
    ShuttingDown,

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
