mod backend;
mod config;
mod control;
mod orchestrator;
mod pipeline;
mod registry;
mod runtime;
mod session;
mod transport;

pub use backend::{
    BackendExit, BackendLauncher, BackendStopper, LISTEN_ENV, LaunchRequest, LaunchedBackend,
    RecorderLauncher, StopSignal,
};
pub use config::{ConfigError, OrchestratorArgs, OrchestratorConfig};
pub use control::{ControlForm, build_control_app, render_sessions_page};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use pipeline::{FinalizeReport, FinalizeStage, StageOutcome, run_finalize};
pub use registry::SessionRegistry;
pub use runtime::build_data_app;
pub use session::{
    Session, SessionSummary, TraceLayout, channel_path, client_identity, format_age, trace_id_for,
};
pub use transport::{DialError, DialPolicy, ForwardError, dial_with_retry, forward};
