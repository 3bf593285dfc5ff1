use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use thiserror::Error;

use crate::transport::DialPolicy;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub trace_root: PathBuf,
    pub socket_root: PathBuf,
    pub server_cmd: Vec<String>,
    pub data_addr: SocketAddr,
    pub control_addr: SocketAddr,
    pub recorder: PathBuf,
    pub tar: PathBuf,
    pub dial: DialPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),
    #[error("no server command specified")]
    MissingServerCommand,
    #[error("dial interval must be non-zero and not exceed the dial timeout")]
    InvalidDialPolicy,
}

/// Records every client's traffic against its own instance of a server.
#[derive(Debug, Parser)]
#[command(name = "traceme", disable_version_flag = true)]
pub struct OrchestratorArgs {
    /// Root directory for recorded traces and their archives.
    #[arg(long, env = "TRACE_DIR")]
    pub trace_dir: PathBuf,

    /// Directory holding per-session backend sockets.
    #[arg(long, env = "SOCKET_DIR")]
    pub socket_dir: PathBuf,

    #[arg(long, env = "TRACEME_DATA_ADDR", default_value = "0.0.0.0:8080")]
    pub data_addr: SocketAddr,

    #[arg(long, env = "TRACEME_CONTROL_ADDR", default_value = "0.0.0.0:8000")]
    pub control_addr: SocketAddr,

    #[arg(long, env = "TRACEME_RECORDER", default_value = "/opt/traceme/bin/rr")]
    pub recorder: PathBuf,

    #[arg(long, env = "TRACEME_TAR", default_value = "tar")]
    pub tar: PathBuf,

    #[arg(long, env = "TRACEME_DIAL_INTERVAL_MS", default_value_t = 100)]
    pub dial_interval_ms: u64,

    #[arg(long, env = "TRACEME_DIAL_TIMEOUT_MS", default_value_t = 3_000)]
    pub dial_timeout_ms: u64,

    /// Server command to run under the recorder for each client.
    #[arg(
        value_name = "SERVER_CMD",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 0..
    )]
    pub server_cmd: Vec<String>,
}

impl OrchestratorArgs {
    pub fn into_config(self) -> Result<OrchestratorConfig, ConfigError> {
        if self.trace_dir.as_os_str().is_empty() {
            return Err(ConfigError::Empty("TRACE_DIR"));
        }
        if self.socket_dir.as_os_str().is_empty() {
            return Err(ConfigError::Empty("SOCKET_DIR"));
        }
        if self.server_cmd.is_empty() {
            return Err(ConfigError::MissingServerCommand);
        }
        if self.dial_interval_ms == 0 || self.dial_interval_ms > self.dial_timeout_ms {
            return Err(ConfigError::InvalidDialPolicy);
        }

        Ok(OrchestratorConfig {
            trace_root: self.trace_dir,
            socket_root: self.socket_dir,
            server_cmd: self.server_cmd,
            data_addr: self.data_addr,
            control_addr: self.control_addr,
            recorder: self.recorder,
            tar: self.tar,
            dial: DialPolicy {
                interval: Duration::from_millis(self.dial_interval_ms),
                timeout: Duration::from_millis(self.dial_timeout_ms),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_trailing_command() {
        let args = OrchestratorArgs::try_parse_from([
            "traceme",
            "--trace-dir",
            "/var/traceme",
            "--socket-dir",
            "/var/run/traceme",
            "--",
            "./server",
            "--port",
            "9000",
        ])
        .expect("arguments should parse");
        let config = args.into_config().expect("config should be valid");

        assert_eq!(config.trace_root, PathBuf::from("/var/traceme"));
        assert_eq!(config.server_cmd, vec!["./server", "--port", "9000"]);
        assert_eq!(config.data_addr, "0.0.0.0:8080".parse().expect("addr"));
        assert_eq!(config.control_addr, "0.0.0.0:8000".parse().expect("addr"));
        assert_eq!(config.dial, DialPolicy::default());
    }

    #[test]
    fn missing_server_command_is_rejected() {
        let args = OrchestratorArgs::try_parse_from([
            "traceme",
            "--trace-dir",
            "/var/traceme",
            "--socket-dir",
            "/var/run/traceme",
        ])
        .expect("arguments should parse");
        assert!(matches!(
            args.into_config(),
            Err(ConfigError::MissingServerCommand)
        ));
    }

    #[test]
    fn dial_interval_longer_than_timeout_is_rejected() {
        let args = OrchestratorArgs::try_parse_from([
            "traceme",
            "--trace-dir",
            "/t",
            "--socket-dir",
            "/s",
            "--dial-interval-ms",
            "500",
            "--dial-timeout-ms",
            "100",
            "server",
        ])
        .expect("arguments should parse");
        assert!(matches!(
            args.into_config(),
            Err(ConfigError::InvalidDialPolicy)
        ));
    }
}
