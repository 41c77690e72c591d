use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use branchpulse_core::{Config, RepoName};
use branchpulse_source::{GitHubSource, SourceAdapter, SourceConfig};
use branchpulse_store::{EntityStore, SqliteStore};
use branchpulse_sync::{pipeline, RepoRun, SyncScope};

use crate::error::{io_err, DaemonError};
use crate::paths::{log_path, logs_dir, pid_path, run_dir, socket_path};
use crate::protocol::{
    DaemonRequest, DaemonResponse, DaemonStatus, RepoStatus, RepoSummary, SyncSummary,
};

/// What the daemon reconciles with.
pub struct Engine {
    pub config: Config,
    pub source: Arc<dyn SourceAdapter>,
    pub store: Arc<dyn EntityStore>,
}

impl Engine {
    /// SQLite store at the configured path and a GitHub client.
    pub fn from_config(
        home: &Path,
        config: Config,
        token: Option<String>,
    ) -> Result<Self, DaemonError> {
        config.validate()?;
        let store = SqliteStore::open(&config.database_path_at(home))?;
        let source = GitHubSource::new(SourceConfig::from_config(&config, token))?;
        Ok(Self {
            config,
            source: Arc::new(source),
            store: Arc::new(store),
        })
    }
}

type StatusTable = BTreeMap<RepoName, RepoStatus>;

fn initial_status(config: &Config) -> StatusTable {
    config
        .repositories
        .iter()
        .map(|repo| (repo.clone(), RepoStatus::never_run(repo.clone())))
        .collect()
}

#[derive(Debug, Clone)]
enum SyncTarget {
    All,
    Repository(RepoName),
}

impl SyncTarget {
    fn scope(&self) -> SyncScope {
        match self {
            SyncTarget::All => SyncScope::All,
            SyncTarget::Repository(repo) => SyncScope::Repository(repo.clone()),
        }
    }

    fn label(&self) -> String {
        match self {
            SyncTarget::All => "all".to_string(),
            SyncTarget::Repository(repo) => repo.0.clone(),
        }
    }
}

struct SyncJob {
    target: SyncTarget,
    trigger: &'static str,
    respond_to: oneshot::Sender<Result<SyncSummary, DaemonError>>,
}

/// Build the engine and block the current thread until the daemon exits.
/// With `log_to_file`, logs go to `~/.branchpulse/logs/daemon.log`.
pub fn start_blocking(
    home: &Path,
    config: Config,
    token: Option<String>,
    log_to_file: bool,
) -> Result<(), DaemonError> {
    if log_to_file {
        let logs = logs_dir(home);
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
        init_tracing(Some(&log_path(home)))?;
    } else {
        init_tracing(None)?;
    }

    let engine = Engine::from_config(home, config, token)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let result = runtime.block_on(run(home.to_path_buf(), engine));
    // An abandoned pass may still hold a blocking thread.
    runtime.shutdown_background();
    result
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf, engine: Engine) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    write_pid_file(&home)?;

    let engine = Arc::new(engine);
    let status = Arc::new(RwLock::new(initial_status(&engine.config)));
    let started_at = Utc::now();
    tracing::info!(
        organization = %engine.config.organization,
        repositories = engine.config.repositories.len(),
        poll_interval_secs = engine.config.poll_interval_secs,
        "daemon starting",
    );

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let ticker_handle = {
        let shutdown = shutdown_tx.clone();
        let sync_tx = sync_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let period = engine.config.poll_interval();
        tokio::spawn(async move {
            let result = ticker_task(period, sync_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        let status = status.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = sync_processor_task(engine, status, sync_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let engine = engine.clone();
        let status = status.clone();
        let sync_tx = sync_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                engine,
                status,
                sync_tx,
                shutdown.clone(),
                shutdown_rx,
                started_at,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    drop(sync_tx);

    let (ticker_result, processor_result, socket_result, signal_result) =
        tokio::join!(ticker_handle, processor_handle, socket_handle, signal_handle);

    let pid = pid_path(&home);
    if pid.exists() {
        let _ = fs::remove_file(&pid);
    }

    handle_join("ticker", ticker_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Queue a full pass every `period`; the first pass runs immediately.
async fn ticker_task(
    period: Duration,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue_sync(&sync_tx, SyncTarget::All, "ticker").await {
                    Ok(summary) => {
                        tracing::info!(
                            written = summary.written,
                            unchanged = summary.unchanged,
                            skipped = summary.skipped,
                            failed = summary.failed,
                            duration_ms = summary.duration_ms,
                            "scheduled pass completed",
                        );
                    }
                    Err(DaemonError::ChannelClosed(_) | DaemonError::ShuttingDown) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "scheduled pass failed");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Run queued passes one at a time. A shutdown arriving mid-pass abandons
/// the pass; each branch write is atomic on its own.
async fn sync_processor_task(
    engine: Arc<Engine>,
    status: Arc<RwLock<StatusTable>>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        let job = tokio::select! {
            _ = shutdown_rx.recv() => break,
            job = sync_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let started = Instant::now();
        let scope = job.target.scope();
        let engine_for_pass = engine.clone();
        let pass = tokio::task::spawn_blocking(move || {
            pipeline::run(
                &engine_for_pass.config,
                engine_for_pass.source.as_ref(),
                engine_for_pass.store.as_ref(),
                &scope,
                false,
            )
        });

        let joined = tokio::select! {
            joined = pass => joined,
            _ = shutdown_rx.recv() => {
                tracing::warn!(scope = %job.target.label(), "shutdown requested mid-pass, abandoning it");
                let _ = job.respond_to.send(Err(DaemonError::ShuttingDown));
                break;
            }
        };

        let outcome = match joined {
            Ok(Ok(runs)) => {
                record_runs(&status, &runs, Utc::now()).await;
                Ok(build_sync_summary(&job.target, job.trigger, &runs, started.elapsed()))
            }
            Ok(Err(err)) => Err(DaemonError::Sync(err)),
            Err(err) => {
                return Err(DaemonError::Protocol(format!("sync task join error: {err}")));
            }
        };
        let _ = job.respond_to.send(outcome);
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    engine: Arc<Engine>,
    status: Arc<RwLock<StatusTable>>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let client = SocketClient {
                    home: home.clone(),
                    engine: engine.clone(),
                    status: status.clone(),
                    sync_tx: sync_tx.clone(),
                    shutdown_tx: shutdown_tx.clone(),
                    started_at,
                };
                tokio::spawn(async move {
                    if let Err(err) = client.serve(stream).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

/// Shared handles one socket connection answers from.
struct SocketClient {
    home: PathBuf,
    engine: Arc<Engine>,
    status: Arc<RwLock<StatusTable>>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: DateTime<Utc>,
}

impl SocketClient {
    async fn serve(self, stream: UnixStream) -> Result<(), DaemonError> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| io_err("daemon socket read", e))?
        {
            if line.trim().is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<DaemonRequest>(&line) {
                Ok(request) => request,
                Err(err) => {
                    let message = format!("invalid request: {err}");
                    write_response(&mut writer, &DaemonResponse::Error { message }).await?;
                    continue;
                }
            };

            let stopping = request == DaemonRequest::Stop;
            let response = self.answer(request).await;
            write_response(&mut writer, &response).await?;
            if stopping {
                break;
            }
        }

        Ok(())
    }

    async fn answer(&self, request: DaemonRequest) -> DaemonResponse {
        match request {
            DaemonRequest::Status => DaemonResponse::Status(
                build_status(&self.home, &self.engine.config, &self.status, self.started_at).await,
            ),
            DaemonRequest::Sync { repository } => {
                let target = repository.map_or(SyncTarget::All, SyncTarget::Repository);
                match enqueue_sync(&self.sync_tx, target, "socket").await {
                    Ok(summary) => DaemonResponse::Synced(summary),
                    Err(err) => DaemonResponse::Error {
                        message: err.to_string(),
                    },
                }
            }
            DaemonRequest::Stop => {
                let _ = self.shutdown_tx.send(());
                DaemonResponse::Stopping
            }
        }
    }
}

async fn build_status(
    home: &Path,
    config: &Config,
    status: &RwLock<StatusTable>,
    started_at: DateTime<Utc>,
) -> DaemonStatus {
    let repositories: Vec<RepoStatus> = status.read().await.values().cloned().collect();
    DaemonStatus {
        pid: std::process::id(),
        started_at,
        organization: config.organization.clone(),
        poll_interval_secs: config.poll_interval_secs,
        last_pass_at: repositories.iter().filter_map(|r| r.last_pass_at).max(),
        repositories,
        socket: socket_path(home).display().to_string(),
        database: config.database_path_at(home).display().to_string(),
    }
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    target: SyncTarget,
    trigger: &'static str,
) -> Result<SyncSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            target,
            trigger,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    rx.await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?
}

async fn record_runs(status: &RwLock<StatusTable>, runs: &[RepoRun], at: DateTime<Utc>) {
    let mut table = status.write().await;
    for run in runs {
        let entry = table
            .entry(run.repo.clone())
            .or_insert_with(|| RepoStatus::never_run(run.repo.clone()));
        entry.last_pass_at = Some(at);
        match &run.result {
            Ok(pass) => {
                entry.last_error = pass.listing_error.clone();
                entry.written = pass.written();
                entry.unchanged = pass.unchanged();
                entry.skipped = pass.skipped();
            }
            Err(err) => {
                entry.last_error = Some(err.to_string());
                entry.written = 0;
                entry.unchanged = 0;
                entry.skipped = 0;
            }
        }
    }
}

fn build_sync_summary(
    target: &SyncTarget,
    trigger: &'static str,
    runs: &[RepoRun],
    duration: Duration,
) -> SyncSummary {
    let repositories: Vec<RepoSummary> = runs
        .iter()
        .map(|run| match &run.result {
            Ok(pass) => RepoSummary {
                repository: run.repo.clone(),
                written: pass.written(),
                unchanged: pass.unchanged(),
                skipped: pass.skipped(),
                error: pass.listing_error.clone(),
            },
            Err(err) => RepoSummary {
                repository: run.repo.clone(),
                written: 0,
                unchanged: 0,
                skipped: 0,
                error: Some(err.to_string()),
            },
        })
        .collect();

    SyncSummary {
        target: target.label(),
        trigger: trigger.to_string(),
        written: repositories.iter().map(|r| r.written).sum(),
        unchanged: repositories.iter().map(|r| r.unchanged).sum(),
        skipped: repositories.iter().map(|r| r.skipped).sum(),
        failed: runs.iter().filter(|r| r.result.is_err()).count(),
        repositories,
        duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [run_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn write_pid_file(home: &Path) -> Result<(), DaemonError> {
    let path = pid_path(home);
    fs::write(&path, format!("{}\n", std::process::id())).map_err(|e| io_err(&path, e))
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the `fmt` subscriber (also receiving `log` records from the
/// library crates). `RUST_LOG` overrides the default `info` filter. Calling
/// it again is a no-op.
pub fn init_tracing(log_file: Option<&Path>) -> Result<(), DaemonError> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| io_err(path, e))?;
            let _ = fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
