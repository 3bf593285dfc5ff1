use std::{
    ffi::OsString,
    fmt, io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// One call into an external archiving, recording or version-control tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolInvocation {
    Pack { trace_dir: PathBuf },
    Compress { trace_dir: PathBuf, archive: PathBuf },
    Extract { archive: PathBuf, dest: PathBuf },
    Clone { origin: String, dest: PathBuf },
}

impl ToolInvocation {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolInvocation::Pack { .. } => "pack",
            ToolInvocation::Compress { .. } => "compress",
            ToolInvocation::Extract { .. } => "extract",
            ToolInvocation::Clone { .. } => "clone",
        }
    }

    /// Program and argument vector this invocation maps to.
    pub fn command_line(&self, toolchain: &Toolchain) -> (PathBuf, Vec<OsString>) {
        match self {
            ToolInvocation::Pack { trace_dir } => (
                toolchain.recorder.clone(),
                vec!["pack".into(), trace_dir.clone().into_os_string()],
            ),
            ToolInvocation::Compress { trace_dir, archive } => (
                toolchain.tar.clone(),
                vec![
                    "--zstd".into(),
                    "-cf".into(),
                    archive.clone().into_os_string(),
                    "-C".into(),
                    trace_dir.clone().into_os_string(),
                    ".".into(),
                ],
            ),
            ToolInvocation::Extract { archive, dest } => (
                toolchain.tar.clone(),
                vec![
                    "--zstd".into(),
                    "-xf".into(),
                    archive.clone().into_os_string(),
                    "-C".into(),
                    dest.clone().into_os_string(),
                ],
            ),
            ToolInvocation::Clone { origin, dest } => (
                toolchain.git.clone(),
                vec![
                    "clone".into(),
                    origin.into(),
                    dest.clone().into_os_string(),
                ],
            ),
        }
    }

    fn inherits_output(&self) -> bool {
        matches!(
            self,
            ToolInvocation::Extract { .. } | ToolInvocation::Clone { .. }
        )
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolInvocation::Pack { trace_dir } => write!(f, "pack {}", trace_dir.display()),
            ToolInvocation::Compress { trace_dir, archive } => {
                write!(f, "compress {} -> {}", trace_dir.display(), archive.display())
            }
            ToolInvocation::Extract { archive, dest } => {
                write!(f, "extract {} -> {}", archive.display(), dest.display())
            }
            ToolInvocation::Clone { origin, dest } => {
                write!(f, "clone {origin} -> {}", dest.display())
            }
        }
    }
}

/// Locations of the external binaries behind each invocation.
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub recorder: PathBuf,
    pub tar: PathBuf,
    pub git: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            recorder: PathBuf::from("/opt/traceme/bin/rr"),
            tar: PathBuf::from("tar"),
            git: PathBuf::from("git"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{kind} exited with {status}")]
    Failed { kind: &'static str, status: ExitStatus },
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: ToolInvocation) -> Result<(), ToolError>;
}

/// Runs invocations as child processes.
#[derive(Clone, Debug, Default)]
pub struct CommandToolRunner {
    toolchain: Toolchain,
}

impl CommandToolRunner {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }
}

#[async_trait]
impl ToolRunner for CommandToolRunner {
    async fn run(&self, invocation: ToolInvocation) -> Result<(), ToolError> {
        let (program, args) = invocation.command_line(&self.toolchain);
        let mut command = Command::new(&program);
        command.args(&args).stdin(Stdio::null());
        if invocation.inherits_output() {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        debug!("running {} ({})", invocation, display_program(&program));
        let status = command.status().await.map_err(|source| ToolError::Spawn {
            program: display_program(&program),
            source,
        })?;
        if !status.success() {
            return Err(ToolError::Failed {
                kind: invocation.kind(),
                status,
            });
        }
        Ok(())
    }
}

fn display_program(program: &Path) -> String {
    program.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain() -> Toolchain {
        Toolchain {
            recorder: PathBuf::from("/opt/rr"),
            tar: PathBuf::from("/bin/tar"),
            git: PathBuf::from("/bin/git"),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn pack_uses_recorder_pack_subcommand() {
        let (program, args) = ToolInvocation::Pack {
            trace_dir: PathBuf::from("/t/a/trace"),
        }
        .command_line(&toolchain());
        assert_eq!(program, PathBuf::from("/opt/rr"));
        assert_eq!(strings(args), vec!["pack", "/t/a/trace"]);
    }

    #[test]
    fn compress_archives_directory_contents() {
        let (program, args) = ToolInvocation::Compress {
            trace_dir: PathBuf::from("/t/a/trace"),
            archive: PathBuf::from("/t/a/trace.tar.zst"),
        }
        .command_line(&toolchain());
        assert_eq!(program, PathBuf::from("/bin/tar"));
        assert_eq!(
            strings(args),
            vec!["--zstd", "-cf", "/t/a/trace.tar.zst", "-C", "/t/a/trace", "."]
        );
    }

    #[test]
    fn extract_and_clone_map_to_tar_and_git() {
        let (tar, extract) = ToolInvocation::Extract {
            archive: PathBuf::from("/t/a/trace.tar.zst"),
            dest: PathBuf::from("/s/a/trace"),
        }
        .command_line(&toolchain());
        assert_eq!(tar, PathBuf::from("/bin/tar"));
        assert_eq!(
            strings(extract),
            vec!["--zstd", "-xf", "/t/a/trace.tar.zst", "-C", "/s/a/trace"]
        );

        let (git, clone) = ToolInvocation::Clone {
            origin: "/src/project".to_string(),
            dest: PathBuf::from("/s/a/code/project"),
        }
        .command_line(&toolchain());
        assert_eq!(git, PathBuf::from("/bin/git"));
        assert_eq!(strings(clone), vec!["clone", "/src/project", "/s/a/code/project"]);
    }

    #[tokio::test]
    async fn missing_program_reports_spawn_error() {
        let runner = CommandToolRunner::new(Toolchain {
            recorder: PathBuf::from("/nonexistent/trace-tools-recorder"),
            ..Toolchain::default()
        });
        let err = runner
            .run(ToolInvocation::Pack {
                trace_dir: PathBuf::from("/tmp"),
            })
            .await
            .expect_err("missing recorder should fail");
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_as_failure() {
        let scratch = tempfile::tempdir().expect("tempdir should be created");
        let runner = CommandToolRunner::new(Toolchain {
            recorder: PathBuf::from("false"),
            ..Toolchain::default()
        });
        let err = runner
            .run(ToolInvocation::Pack {
                trace_dir: scratch.path().to_path_buf(),
            })
            .await
            .expect_err("false should exit non-zero");
        assert!(matches!(err, ToolError::Failed { kind: "pack", .. }));
    }
}
