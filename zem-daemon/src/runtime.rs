use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use zem_core::{prefs, Preferences, SessionId};
use zem_sync::{
    resolve_editor, Decisions, EditSessionTracker, EditorLauncher, OpenOutcome, ProcessLauncher,
    SyncError, TickReport, TrackerPolicy, WebDavDocument,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, zem_root};
use crate::protocol::{DaemonRequest, DaemonResponse, FinishedReply, GotoReply, OpenReply, SyncReply};

/// A request forwarded from a socket client to the processor.
struct Job {
    request: DaemonRequest,
    respond_to: oneshot::Sender<DaemonResponse>,
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Sole owner of the tracker and the loaded preferences. Every command and
/// every poll tick goes through `&mut self`, so they never interleave.
pub struct Processor {
    home: PathBuf,
    prefs: Preferences,
    tracker: EditSessionTracker,
    launcher: Box<dyn EditorLauncher>,
    started_at_unix: u64,
    last_sync_at_unix: u64,
}

impl Processor {
    pub fn new(home: PathBuf, prefs: Preferences, launcher: Box<dyn EditorLauncher>) -> Self {
        let tracker = EditSessionTracker::new(TrackerPolicy::from(&prefs));
        Self {
            home,
            prefs,
            tracker,
            launcher,
            started_at_unix: unix_seconds_now(),
            last_sync_at_unix: 0,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.prefs.poll_interval()
    }

    pub fn tracker(&self) -> &EditSessionTracker {
        &self.tracker
    }

    /// Answer one protocol request. `stop` is handled by the socket layer.
    pub fn handle(&mut self, request: &DaemonRequest) -> DaemonResponse {
        let result = match request.cmd.as_str() {
            "status" => Ok(self.status()),
            "list" => serde_json::to_value(self.tracker.views()).map_err(DaemonError::from),
            "open" => self.open(request),
            "goto" => self.goto(request),
            "finish" => self.finish(request),
            "sync" => serde_json::to_value(SyncReply::from(&self.tick())).map_err(DaemonError::from),
            "reload" => self.reload(),
            other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
        };

        match result {
            Ok(data) => DaemonResponse::ok(data),
            Err(DaemonError::Sync(SyncError::ConfirmationRequired(question))) => {
                DaemonResponse::confirmation(question.kind().as_str(), &question.message())
            }
            Err(err) => {
                tracing::warn!(cmd = %request.cmd, error = %err, "request failed");
                DaemonResponse::error(err.to_string())
            }
        }
    }

    /// One poll pass over every open session.
    pub fn tick(&mut self) -> TickReport {
        let report = self.tracker.poll_tick();
        if !report.pushed.is_empty() {
            self.last_sync_at_unix = unix_seconds_now();
        }
        report
    }

    /// Forget every session. Remote locks are left as they are.
    pub fn shutdown(&mut self) {
        self.tracker.abandon_all();
    }

    fn status(&self) -> Value {
        json!({
            "running": true,
            "version": env!("CARGO_PKG_VERSION"),
            "started_at_unix": self.started_at_unix,
            "last_sync_at_unix": self.last_sync_at_unix,
            "poll_interval_secs": self.poll_interval().as_secs_f64(),
            "sessions": self.tracker.len(),
            "socket": socket_path(&self.home).display().to_string(),
        })
    }

    fn open(&mut self, request: &DaemonRequest) -> Result<Value, DaemonError> {
        let path = request
            .path
            .as_deref()
            .ok_or_else(|| DaemonError::Protocol("open requires 'path'".to_string()))?;
        let document = WebDavDocument::from_zem_file(path, &self.prefs)?;
        let decisions = Decisions {
            borrow: request.borrow,
            finish: None,
        };
        let outcome = self.tracker.open(Box::new(document), &decisions)?;
        let id = outcome.id();
        let session = self
            .tracker
            .get(id)
            .ok_or(SyncError::UnknownSession(id))?;

        let editor = resolve_editor(&self.prefs, session.metadata());
        let launch_error = self
            .launcher
            .launch(&editor, session.content_file())
            .err()
            .map(|err| {
                tracing::warn!(session = %id, error = %err, "editor launch failed");
                err.to_string()
            });

        let reply = OpenReply {
            id,
            url: session.url().to_owned(),
            content_file: session.content_file().to_path_buf(),
            existing: matches!(outcome, OpenOutcome::Existing(_)),
            editor: editor.program,
            launch_error,
        };

        if self.prefs.cleanup_files {
            match fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed consumed .zem file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "could not remove .zem file")
                }
            }
        }

        Ok(serde_json::to_value(reply)?)
    }

    fn goto(&self, request: &DaemonRequest) -> Result<Value, DaemonError> {
        let id = request
            .id
            .map(SessionId)
            .ok_or_else(|| DaemonError::Protocol("goto requires 'id'".to_string()))?;
        let session = self
            .tracker
            .get(id)
            .ok_or(SyncError::UnknownSession(id))?;
        let editor = resolve_editor(&self.prefs, session.metadata());
        self.launcher.launch(&editor, session.content_file())?;
        Ok(serde_json::to_value(GotoReply {
            id,
            content_file: session.content_file().to_path_buf(),
            editor: editor.program,
        })?)
    }

    fn finish(&mut self, request: &DaemonRequest) -> Result<Value, DaemonError> {
        let ids: Vec<SessionId> = request.ids.iter().copied().map(SessionId).collect();
        let decisions = Decisions {
            borrow: None,
            finish: request.confirmed.then_some(true),
        };
        let report = self.tracker.finish(&ids, &decisions)?;
        let finished: Vec<FinishedReply> = report.finished.iter().map(FinishedReply::from).collect();
        Ok(serde_json::to_value(finished)?)
    }

    fn reload(&mut self) -> Result<Value, DaemonError> {
        self.prefs = prefs::load_at(&self.home)?;
        self.tracker.set_policy(TrackerPolicy::from(&self.prefs));
        tracing::info!(
            poll_interval_secs = self.poll_interval().as_secs_f64(),
            "preferences reloaded",
        );
        Ok(json!({ "poll_interval_secs": self.poll_interval().as_secs_f64() }))
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime. Needs a multi-thread tokio runtime: blocking
/// HTTP calls run inside the processor task via `block_in_place`.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let prefs = prefs::load_at(&home)?;
    let processor = Processor::new(home.clone(), prefs, Box::new(ProcessLauncher));
    tracing::info!(
        home = %home.display(),
        poll_interval_secs = processor.poll_interval().as_secs_f64(),
        "zem daemon starting",
    );

    let (job_tx, job_rx) = mpsc::channel::<Job>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = processor_task(processor, job_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(home, job_tx, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
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

    let (processor_result, socket_result, signal_result) =
        tokio::join!(processor_handle, socket_handle, signal_handle);

    handle_join("processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("zem daemon stopped");
    Ok(())
}

async fn processor_task(
    mut processor: Processor,
    mut job_rx: mpsc::Receiver<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut period = processor.poll_interval();
    let mut ticker = poll_timer(period);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let response = tokio::task::block_in_place(|| processor.handle(&job.request));
                if processor.poll_interval() != period {
                    period = processor.poll_interval();
                    ticker = poll_timer(period);
                }
                let _ = job.respond_to.send(response);
            }
            _ = ticker.tick() => {
                let report = tokio::task::block_in_place(|| processor.tick());
                tracing::debug!(
                    pushed = report.pushed.len(),
                    unchanged = report.unchanged,
                    failed = report.failed.len(),
                    "poll tick",
                );
            }
        }
    }

    processor.shutdown();
    Ok(())
}

/// Interval whose first tick is one full period away.
fn poll_timer(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn socket_server_task(
    home: PathBuf,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, job_tx, shutdown_tx).await {
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

async fn handle_socket_client(
    stream: UnixStream,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
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

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = if stop {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        } else {
            match dispatch(&job_tx, request).await {
                Ok(response) => response,
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        };

        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

async fn dispatch(
    job_tx: &mpsc::Sender<Job>,
    request: DaemonRequest,
) -> Result<DaemonResponse, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(Job {
            request,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("request queue"))?;
    rx.await
        .map_err(|_| DaemonError::ChannelClosed("request response"))
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
    let root = zem_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
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

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
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
