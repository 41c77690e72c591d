//! # branchpulse-sync
//!
//! Fingerprint-gated reconciliation of hosted branches into the entity store.
//!
//! [`Reconciler::reconcile_repo`] runs one two-phase pass over a repository;
//! [`pipeline::run`] drives it across the configured repositories and is the
//! shared entrypoint for `branchpulse sync` and the daemon.

pub mod error;
pub mod pipeline;
pub mod reconciler;

pub use error::SyncError;
pub use pipeline::{run, run_configured, RepoRun, SyncScope};
pub use reconciler::{
    Action, BranchOutcome, Phase, ReconcileOptions, Reconciler, RepoPassResult, SkipReason,
};
