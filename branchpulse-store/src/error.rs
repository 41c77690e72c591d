//! Error types for branchpulse-store.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write named an empty branch or repository.
    #[error("invalid key: branch '{branch}' in repository '{repo}'")]
    InvalidKey { branch: String, repo: String },

    /// SQLite failed (locked, disk I/O, malformed schema, ...).
    #[error("store unavailable during {op}: {source}")]
    Unavailable {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Another thread panicked while holding the connection.
    #[error("store connection lock poisoned during {op}")]
    LockPoisoned { op: &'static str },

    /// Creating the database directory failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted value could not be read back.
    #[error("corrupt {column} for {key}: '{value}'")]
    Corrupt {
        key: String,
        column: &'static str,
        value: String,
    },
}

impl StoreError {
    /// True when the storage layer itself is unreachable, as opposed to a
    /// caller or data error.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable { .. } | StoreError::LockPoisoned { .. } | StoreError::Io { .. }
        )
    }
}

/// Convenience constructor for [`StoreError::Unavailable`].
pub(crate) fn unavailable(op: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |source| StoreError::Unavailable { op, source }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
