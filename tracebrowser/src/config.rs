use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use thiserror::Error;

pub const DEFAULT_REPLAY_PATH: &str =
    "/opt/traceme/bin:/usr/local/go/bin:/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub trace_root: PathBuf,
    pub state_root: PathBuf,
    pub code_origin: String,
    pub project_name: String,
    pub project_package: String,
    pub listen_addr: SocketAddr,
    pub editor_addr: SocketAddr,
    pub editor_bin: PathBuf,
    pub tar: PathBuf,
    pub git: PathBuf,
    pub replay_path_env: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("please set {0}")]
    Missing(&'static str),
    #[error("PROJECT_NAME must be a single path component, got {0:?}")]
    InvalidProjectName(String),
}

/// Lists recorded traces and opens each one in a replay-ready editor workspace.
#[derive(Debug, Parser)]
#[command(name = "tracebrowser", disable_version_flag = true)]
pub struct BrowserArgs {
    /// Directory holding `<trace>/trace.tar.zst` archives.
    #[arg(long, env = "TRACE_DIR")]
    pub trace_dir: PathBuf,

    /// Directory where workspaces and editor state are materialized.
    #[arg(long, env = "STATE_DIR")]
    pub state_dir: PathBuf,

    /// Clone origin for each workspace's source tree.
    #[arg(long, env = "CODE_SRC_DIR")]
    pub code_src_dir: String,

    #[arg(long, env = "PROJECT_NAME")]
    pub project_name: String,

    /// Source path the recorded binary was built from.
    #[arg(long, env = "PROJECT_PACKAGE")]
    pub project_package: String,

    #[arg(long, env = "TRACEBROWSER_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    #[arg(long, env = "TRACEBROWSER_EDITOR_ADDR", default_value = "127.0.0.1:8081")]
    pub editor_addr: SocketAddr,

    #[arg(
        long,
        env = "TRACEBROWSER_EDITOR_BIN",
        default_value = "/app/code-server/bin/code-server"
    )]
    pub editor_bin: PathBuf,

    #[arg(long, env = "TRACEBROWSER_TAR", default_value = "tar")]
    pub tar: PathBuf,

    #[arg(long, env = "TRACEBROWSER_GIT", default_value = "git")]
    pub git: PathBuf,

    #[arg(long, env = "TRACEBROWSER_REPLAY_PATH", default_value = DEFAULT_REPLAY_PATH)]
    pub replay_path_env: String,
}

impl BrowserArgs {
    pub fn into_config(self) -> Result<BrowserConfig, ConfigError> {
        if self.trace_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("TRACE_DIR"));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("STATE_DIR"));
        }
        if self.code_src_dir.trim().is_empty() {
            return Err(ConfigError::Missing("CODE_SRC_DIR"));
        }
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::Missing("PROJECT_NAME"));
        }
        if self.project_name.contains('/') || matches!(self.project_name.as_str(), "." | "..") {
            return Err(ConfigError::InvalidProjectName(self.project_name));
        }
        if self.project_package.trim().is_empty() {
            return Err(ConfigError::Missing("PROJECT_PACKAGE"));
        }

        Ok(BrowserConfig {
            trace_root: self.trace_dir,
            state_root: self.state_dir,
            code_origin: self.code_src_dir,
            project_name: self.project_name,
            project_package: self.project_package,
            listen_addr: self.listen_addr,
            editor_addr: self.editor_addr,
            editor_bin: self.editor_bin,
            tar: self.tar,
            git: self.git,
            replay_path_env: self.replay_path_env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(project_name: &str) -> BrowserArgs {
        BrowserArgs::try_parse_from([
            "tracebrowser",
            "--trace-dir",
            "/var/traceme",
            "--state-dir",
            "/var/tracebrowser",
            "--code-src-dir",
            "/src/app",
            "--project-name",
            project_name,
            "--project-package",
            "/go/src/example.com/app",
        ])
        .expect("arguments should parse")
    }

    #[test]
    fn builds_config_with_defaults() {
        let config = args("app").into_config().expect("config should be valid");
        assert_eq!(config.state_root, PathBuf::from("/var/tracebrowser"));
        assert_eq!(config.code_origin, "/src/app");
        assert_eq!(config.editor_addr, "127.0.0.1:8081".parse().expect("addr"));
        assert_eq!(config.replay_path_env, DEFAULT_REPLAY_PATH);
    }

    #[test]
    fn empty_required_value_is_rejected() {
        assert!(matches!(
            args("").into_config(),
            Err(ConfigError::Missing("PROJECT_NAME"))
        ));
        assert!(matches!(
            args("../app").into_config(),
            Err(ConfigError::InvalidProjectName(_))
        ));
    }
}
