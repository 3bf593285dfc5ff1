use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use axum::http::StatusCode;
use thiserror::Error;
use trace_tools::{ToolError, ToolInvocation, ToolRunner, category_workspace};
use tracing::{info, warn};

use crate::descriptor::{LaunchDescriptor, write_descriptor};

pub const ARCHIVE_FILE: &str = "trace.tar.zst";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("trace {0:?} not found")]
    NotFound(String),
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to extract trace archive for {trace}: {source}")]
    Extract {
        trace: String,
        #[source]
        source: ToolError,
    },
    #[error("failed to clone code for {trace}: {source}")]
    Clone {
        trace: String,
        #[source]
        source: ToolError,
    },
    #[error("failed to create launch config {}: {source}", .path.display())]
    WriteDescriptor {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProvisionError::NotFound(_) => StatusCode::NOT_FOUND,
            ProvisionError::CreateDir { .. }
            | ProvisionError::Extract { .. }
            | ProvisionError::Clone { .. }
            | ProvisionError::WriteDescriptor { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Where archives live and where each trace's workspace is materialized.
#[derive(Clone, Debug)]
pub struct WorkspaceLayout {
    trace_root: PathBuf,
    state_root: PathBuf,
    project_name: String,
}

impl WorkspaceLayout {
    pub fn new(trace_root: PathBuf, state_root: PathBuf, project_name: String) -> Self {
        Self {
            trace_root,
            state_root,
            project_name,
        }
    }

    pub fn trace_root(&self) -> &Path {
        &self.trace_root
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn archive_path(&self, trace: &str) -> PathBuf {
        self.trace_root.join(trace).join(ARCHIVE_FILE)
    }

    pub fn extracted_dir(&self, trace: &str) -> PathBuf {
        self.state_root.join(trace).join("trace")
    }

    pub fn code_dir(&self, trace: &str) -> PathBuf {
        self.state_root
            .join(trace)
            .join("code")
            .join(&self.project_name)
    }

    pub fn handle(&self, trace: &str) -> WorkspaceHandle {
        WorkspaceHandle {
            trace: trace.to_string(),
            extracted: self.extracted_dir(trace),
            code: self.code_dir(trace),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceHandle {
    pub trace: String,
    pub extracted: PathBuf,
    pub code: PathBuf,
}

/// A trace name must be a single, non-special path component.
pub fn validate_trace_name(trace: &str) -> Result<(), ProvisionError> {
    let invalid = trace.is_empty()
        || matches!(trace, "." | "..")
        || trace.contains(['/', '\\', '\0']);
    if invalid {
        return Err(ProvisionError::NotFound(trace.to_string()));
    }
    Ok(())
}

/// Turns trace archives into replay-ready workspaces, at most once per trace.
pub struct Provisioner {
    layout: WorkspaceLayout,
    code_origin: String,
    descriptor: LaunchDescriptor,
    tools: Arc<dyn ToolRunner>,
    ready: Mutex<HashSet<String>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Provisioner {
    pub fn new(
        layout: WorkspaceLayout,
        code_origin: String,
        descriptor: LaunchDescriptor,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            layout,
            code_origin,
            descriptor,
            tools,
            ready: Mutex::new(HashSet::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn is_ready(&self, trace: &str) -> bool {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(trace)
    }

    pub async fn resolve_workspace(&self, trace: &str) -> Result<WorkspaceHandle, ProvisionError> {
        validate_trace_name(trace)?;
        let handle = self.layout.handle(trace);
        if self.is_ready(trace) {
            return Ok(handle);
        }

        let lock = self.lock_for(trace);
        let _guard = lock.lock().await;
        if self.is_ready(trace) {
            return Ok(handle);
        }

        self.provision(&handle).await?;
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(trace.to_string());
        // Later callers stop at the ready check, so the trace's lock is no longer needed.
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(trace);
        info!("{} workspace for {trace} is ready", category_workspace());
        Ok(handle)
    }

    fn lock_for(&self, trace: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(trace.to_string())
            .or_default()
            .clone()
    }

    #[cfg(test)]
    fn pending_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn provision(&self, handle: &WorkspaceHandle) -> Result<(), ProvisionError> {
        let trace = handle.trace.as_str();
        let archive = self.layout.archive_path(trace);
        if !path_exists(&archive).await {
            warn!(
                "{} no archive at {} for {trace}",
                category_workspace(),
                archive.display()
            );
            return Err(ProvisionError::NotFound(trace.to_string()));
        }

        if !path_exists(&handle.extracted).await {
            create_dir(&handle.extracted).await?;
            info!("{} extracting {trace}", category_workspace());
            let extract = ToolInvocation::Extract {
                archive,
                dest: handle.extracted.clone(),
            };
            if let Err(source) = self.tools.run(extract).await {
                discard_partial(&handle.extracted).await;
                return Err(ProvisionError::Extract {
                    trace: trace.to_string(),
                    source,
                });
            }
        }

        if !path_exists(&handle.code).await {
            if let Some(parent) = handle.code.parent() {
                create_dir(parent).await?;
            }
            info!(
                "{} cloning {} for {trace}",
                category_workspace(),
                self.code_origin
            );
            let clone = ToolInvocation::Clone {
                origin: self.code_origin.clone(),
                dest: handle.code.clone(),
            };
            if let Err(source) = self.tools.run(clone).await {
                discard_partial(&handle.code).await;
                return Err(ProvisionError::Clone {
                    trace: trace.to_string(),
                    source,
                });
            }
        }

        write_descriptor(&handle.code, &self.descriptor)
            .await
            .map_err(|source| ProvisionError::WriteDescriptor {
                path: handle.code.join(".vscode").join("launch.json"),
                source,
            })
    }
}

async fn path_exists(path: &Path) -> bool {
    matches!(tokio::fs::try_exists(path).await, Ok(true))
}

async fn create_dir(path: &Path) -> Result<(), ProvisionError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| ProvisionError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Removes a half-built subtree so the next request starts over.
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => {
            warn!(
                "{} failed to remove {}: {err}",
                category_workspace(),
                path.display()
            );
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::{os::unix::process::ExitStatusExt, process::ExitStatus};

    use async_trait::async_trait;

    use super::*;

    /// Materializes the extract and clone destinations without running tools.
    struct MarkerTools;

    #[async_trait]
    impl ToolRunner for MarkerTools {
        async fn run(&self, invocation: ToolInvocation) -> Result<(), ToolError> {
            let dest = match invocation {
                ToolInvocation::Extract { dest, .. } | ToolInvocation::Clone { dest, .. } => dest,
                other => {
                    return Err(ToolError::Failed {
                        kind: other.kind(),
                        status: ExitStatus::from_raw(1 << 8),
                    });
                }
            };
            std::fs::create_dir_all(&dest).map_err(|source| ToolError::Spawn {
                program: "marker".to_string(),
                source,
            })
        }
    }

    #[tokio::test]
    async fn trace_lock_is_released_once_workspace_is_ready() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let layout = WorkspaceLayout::new(
            scratch.path().join("traces"),
            scratch.path().join("state"),
            "app".to_string(),
        );
        let archive = layout.archive_path("t1");
        std::fs::create_dir_all(archive.parent().expect("archive parent")).expect("trace dir");
        std::fs::write(&archive, b"zstd").expect("archive");

        let provisioner = Provisioner::new(
            layout,
            "/src/app".to_string(),
            LaunchDescriptor::replay("/pkg", "/bin"),
            Arc::new(MarkerTools),
        );
        provisioner
            .resolve_workspace("t1")
            .await
            .expect("workspace should provision");
        assert!(provisioner.is_ready("t1"));
        assert_eq!(provisioner.pending_locks(), 0);

        let missing = provisioner.resolve_workspace("t2").await;
        assert!(matches!(missing, Err(ProvisionError::NotFound(_))));
        assert!(!provisioner.is_ready("t2"));
    }

    #[test]
    fn layout_places_workspace_under_state_root() {
        let layout = WorkspaceLayout::new(
            PathBuf::from("/traces"),
            PathBuf::from("/state"),
            "app".to_string(),
        );
        assert_eq!(
            layout.archive_path("t1"),
            PathBuf::from("/traces/t1/trace.tar.zst")
        );
        assert_eq!(layout.extracted_dir("t1"), PathBuf::from("/state/t1/trace"));
        assert_eq!(layout.code_dir("t1"), PathBuf::from("/state/t1/code/app"));
    }

    #[test]
    fn path_like_trace_names_are_rejected() {
        for name in ["", ".", "..", "a/b", "..\\x"] {
            assert!(
                matches!(validate_trace_name(name), Err(ProvisionError::NotFound(_))),
                "{name:?} should be rejected"
            );
        }
        assert!(validate_trace_name("10.0.0.1-2024-01-01-00-00-00").is_ok());
    }

    #[test]
    fn only_missing_trace_maps_to_not_found() {
        assert_eq!(
            ProvisionError::NotFound("x".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProvisionError::Extract {
                trace: "x".to_string(),
                source: ToolError::Failed {
                    kind: "extract",
                    status: ExitStatus::from_raw(2 << 8),
                },
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
