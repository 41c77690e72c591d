//! Scheduler daemon: interval ticker + pass processor + socket server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
    DaemonStatus, RepoStatus, RepoSummary, SyncSummary,
};
pub use runtime::{init_tracing, run, start_blocking, Engine};
