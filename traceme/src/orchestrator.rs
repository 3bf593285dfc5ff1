use std::{
    io,
    path::PathBuf,
    process::ExitStatus,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::http::StatusCode;
use chrono::Local;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::{
    sync::CancellationToken,
    task::{TaskTracker, task_tracker::TaskTrackerToken},
};
use trace_tools::{ToolRunner, category_pipeline, category_session};
use tracing::{error, info, warn};

use crate::{
    backend::{BackendLauncher, LaunchRequest, StopSignal},
    config::OrchestratorConfig,
    pipeline::{FinalizeReport, run_finalize},
    registry::SessionRegistry,
    session::{Session, SessionSummary, TraceLayout, channel_path, trace_id_for},
    transport::DialPolicy,
};

const REPORT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no active session for {0}")]
    UnknownSession(String),
    #[error("orchestrator is shutting down")]
    ShuttingDown,
    #[error("failed to create trace directory {}: {source}", .path.display())]
    CreateTraceDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to start backend for {identity}: {source}")]
    StartBackend {
        identity: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to signal backend for {identity}: {source}")]
    Signal {
        identity: String,
        #[source]
        source: io::Error,
    },
}

impl OrchestratorError {
    /// Session-creation failures take the whole orchestrator down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CreateTraceDir { .. } | OrchestratorError::StartBackend { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            OrchestratorError::UnknownSession(_) => StatusCode::NOT_FOUND,
            OrchestratorError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::CreateTraceDir { .. }
            | OrchestratorError::StartBackend { .. }
            | OrchestratorError::Signal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

enum SessionEvent {
    Exited {
        identity: String,
        trace_id: String,
        status: io::Result<ExitStatus>,
        token: TaskTrackerToken,
    },
}

/// Owns the session registry and every session's lifecycle.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    layout: TraceLayout,
    registry: Arc<SessionRegistry>,
    launcher: Arc<dyn BackendLauncher>,
    events: mpsc::UnboundedSender<SessionEvent>,
    reports: broadcast::Sender<FinalizeReport>,
    tracker: TaskTracker,
    shutting_down: AtomicBool,
    fatal: CancellationToken,
    fatal_message: Mutex<Option<String>>,
}

impl Orchestrator {
    /// Must be called from within a tokio runtime; spawns the session event loop.
    pub fn new(
        config: OrchestratorConfig,
        launcher: Arc<dyn BackendLauncher>,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        let layout = TraceLayout::new(config.trace_root.clone());
        let registry = Arc::new(SessionRegistry::new());
        let (events, receiver) = mpsc::unbounded_channel();
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        tokio::spawn(run_event_loop(
            receiver,
            registry.clone(),
            tools,
            layout.clone(),
            reports.clone(),
        ));

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                layout,
                registry,
                launcher,
                events,
                reports,
                tracker: TaskTracker::new(),
                shutting_down: AtomicBool::new(false),
                fatal: CancellationToken::new(),
                fatal_message: Mutex::new(None),
            }),
        }
    }

    pub fn layout(&self) -> &TraceLayout {
        &self.inner.layout
    }

    pub fn dial_policy(&self) -> DialPolicy {
        self.inner.config.dial
    }

    /// Returns the live session for `identity`, starting one if there is none.
    pub fn resolve_session(&self, identity: &str) -> Result<Arc<Session>, OrchestratorError> {
        if self.is_shutting_down() {
            return Err(OrchestratorError::ShuttingDown);
        }
        let (session, _) = self.inner.registry.get_or_create(identity, || {
            // Shutdown sets the flag before it snapshots the registry.
            if self.is_shutting_down() {
                return Err(OrchestratorError::ShuttingDown);
            }
            self.start_session(identity)
        })?;
        Ok(session)
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.inner.registry.snapshot()
    }

    /// Asks the session's backend to terminate; teardown follows its exit.
    pub fn end_session(&self, identity: &str) -> Result<(), OrchestratorError> {
        let session = self
            .inner
            .registry
            .get(identity)
            .ok_or_else(|| OrchestratorError::UnknownSession(identity.to_string()))?;
        let signalled = session
            .request_stop(StopSignal::Terminate)
            .map_err(|source| OrchestratorError::Signal {
                identity: identity.to_string(),
                source,
            })?;
        if signalled {
            info!(
                "{} ending trace {} for {identity}",
                category_session(),
                session.trace_id()
            );
        } else {
            info!(
                "{} end already requested for {identity}",
                category_session()
            );
        }
        Ok(())
    }

    /// Interrupts every live backend, then waits for all finalize pipelines.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        for session in self.inner.registry.sessions() {
            if let Err(err) = session.request_stop(StopSignal::Interrupt) {
                warn!(
                    "{} failed to interrupt backend for {}: {err}",
                    category_session(),
                    session.identity()
                );
            }
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("{} all sessions finalized", category_session());
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<FinalizeReport> {
        self.inner.reports.subscribe()
    }

    /// Records the first fatal error; [`Orchestrator::fatal_error`] resolves afterwards.
    pub fn report_fatal(&self, err: &OrchestratorError) {
        {
            let mut message = self
                .inner
                .fatal_message
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if message.is_none() {
                *message = Some(err.to_string());
            }
        }
        self.inner.fatal.cancel();
    }

    pub async fn fatal_error(&self) -> String {
        self.inner.fatal.cancelled().await;
        self.inner
            .fatal_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "fatal orchestrator error".to_string())
    }

    fn start_session(&self, identity: &str) -> Result<Session, OrchestratorError> {
        let base_id = trace_id_for(identity, &Local::now());
        let trace_id = self
            .inner
            .layout
            .claim_session_dir(&base_id)
            .map_err(|source| OrchestratorError::CreateTraceDir {
                path: self.inner.layout.session_dir(&base_id),
                source,
            })?;

        let channel = channel_path(&self.inner.config.socket_root, identity);
        match std::fs::remove_file(&channel) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                warn!(
                    "{} failed to remove stale socket {}: {err}",
                    category_session(),
                    channel.display()
                );
            }
            _ => {}
        }

        info!("{} starting backend for {identity}", category_session());
        let trace_dir = self.inner.layout.raw_trace_dir(&trace_id);
        let launched = self
            .inner
            .launcher
            .launch(&LaunchRequest {
                identity,
                trace_dir: &trace_dir,
                channel: &channel,
            })
            .map_err(|source| OrchestratorError::StartBackend {
                identity: identity.to_string(),
                source,
            })?;

        let token = self.inner.tracker.token();
        let events = self.inner.events.clone();
        let exit = launched.exit;
        let waiter_identity = identity.to_string();
        let waiter_trace_id = trace_id.clone();
        tokio::spawn(async move {
            let status = exit.await;
            let _ = events.send(SessionEvent::Exited {
                identity: waiter_identity,
                trace_id: waiter_trace_id,
                status,
                token,
            });
        });

        Ok(Session::new(identity, trace_id, channel, launched.stopper))
    }
}

async fn run_event_loop(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    registry: Arc<SessionRegistry>,
    tools: Arc<dyn ToolRunner>,
    layout: TraceLayout,
    reports: broadcast::Sender<FinalizeReport>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Exited {
                identity,
                trace_id,
                status,
                token,
            } => {
                registry.remove(&identity, &trace_id);
                match &status {
                    Ok(status) if status.success() => {
                        info!("{} server for {identity} exited", category_session());
                    }
                    Ok(status) => {
                        warn!(
                            "{} server for {identity} exited with error: {status}",
                            category_session()
                        );
                    }
                    Err(err) => {
                        error!(
                            "{} failed waiting on server for {identity}: {err}",
                            category_session()
                        );
                    }
                }

                let tools = tools.clone();
                let layout = layout.clone();
                let reports = reports.clone();
                tokio::spawn(async move {
                    let _token = token;
                    info!("{} finalizing trace {trace_id}", category_pipeline());
                    let report = run_finalize(tools.as_ref(), &layout, &identity, &trace_id).await;
                    let _ = reports.send(report);
                });
            }
        }
    }
}
