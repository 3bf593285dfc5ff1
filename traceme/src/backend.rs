use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    pin::Pin,
    process::{ExitStatus, Stdio},
};

use tokio::process::Command;

/// Environment variable through which a backend learns where to listen.
pub const LISTEN_ENV: &str = "LISTEN_UNIX";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful termination requested from the control plane.
    Terminate,
    /// Orchestrator shutdown.
    Interrupt,
}

impl StopSignal {
    fn as_raw(self) -> libc::c_int {
        match self {
            StopSignal::Terminate => libc::SIGTERM,
            StopSignal::Interrupt => libc::SIGINT,
        }
    }
}

pub trait BackendStopper: Send + Sync {
    fn stop(&self, signal: StopSignal) -> io::Result<()>;
}

pub type BackendExit = Pin<Box<dyn Future<Output = io::Result<ExitStatus>> + Send>>;

pub struct LaunchRequest<'a> {
    pub identity: &'a str,
    pub trace_dir: &'a Path,
    pub channel: &'a Path,
}

pub struct LaunchedBackend {
    pub stopper: Box<dyn BackendStopper>,
    /// Resolves once the backend has exited. Owned by the session's waiter task.
    pub exit: BackendExit,
}

pub trait BackendLauncher: Send + Sync {
    fn launch(&self, request: &LaunchRequest<'_>) -> io::Result<LaunchedBackend>;
}

/// Starts the target service under the deterministic-replay recorder.
#[derive(Clone, Debug)]
pub struct RecorderLauncher {
    recorder: PathBuf,
    server_cmd: Vec<String>,
}

impl RecorderLauncher {
    pub fn new(recorder: impl Into<PathBuf>, server_cmd: Vec<String>) -> Self {
        Self {
            recorder: recorder.into(),
            server_cmd,
        }
    }

    pub fn command(&self, request: &LaunchRequest<'_>) -> Command {
        let mut command = Command::new(&self.recorder);
        command
            .arg("record")
            .arg("-W")
            .arg("--output-trace-dir")
            .arg(request.trace_dir)
            .arg("--")
            .args(&self.server_cmd)
            .env(LISTEN_ENV, request.channel)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command
    }
}

impl BackendLauncher for RecorderLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> io::Result<LaunchedBackend> {
        let mut child = self.command(request).spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("backend exited before its pid was read"))?;
        Ok(LaunchedBackend {
            stopper: Box::new(PidStopper { pid }),
            exit: Box::pin(async move { child.wait().await }),
        })
    }
}

struct PidStopper {
    pid: u32,
}

impl BackendStopper for PidStopper {
    fn stop(&self, signal: StopSignal) -> io::Result<()> {
        let pid = libc::pid_t::try_from(self.pid)
            .map_err(|_| io::Error::other(format!("pid {} out of range", self.pid)))?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, signal.as_raw()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
