use std::{ffi::OsString, io, net::SocketAddr, path::Path, process::Stdio};

use tokio::process::{Child, Command};
use trace_tools::category_editor;
use tracing::info;

use crate::config::BrowserConfig;

/// Argument vector for the embedded editor, with its state kept under `state_root`.
pub fn editor_args(bind_addr: SocketAddr, state_root: &Path) -> Vec<OsString> {
    vec![
        "--bind-addr".into(),
        bind_addr.to_string().into(),
        "--user-data-dir".into(),
        state_root.join("data").into_os_string(),
        "--extensions-dir".into(),
        state_root.join("extensions").into_os_string(),
        "--disable-telemetry".into(),
        "--auth".into(),
        "none".into(),
        "--disable-workspace-trust".into(),
    ]
}

/// Starts the editor; the child is killed if the handle is dropped.
pub fn spawn_editor(config: &BrowserConfig) -> io::Result<Child> {
    let mut command = Command::new(&config.editor_bin);
    command
        .args(editor_args(config.editor_addr, &config.state_root))
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let child = command.spawn()?;
    info!(
        "{} started {} on {} (pid {})",
        category_editor(),
        config.editor_bin.display(),
        config.editor_addr,
        child.id().unwrap_or_default()
    );
    Ok(child)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn editor_state_lives_under_state_root() {
        let args: Vec<String> = editor_args(
            "127.0.0.1:8081".parse().expect("addr"),
            &PathBuf::from("/var/state"),
        )
        .into_iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

        assert_eq!(
            args,
            vec![
                "--bind-addr",
                "127.0.0.1:8081",
                "--user-data-dir",
                "/var/state/data",
                "--extensions-dir",
                "/var/state/extensions",
                "--disable-telemetry",
                "--auth",
                "none",
                "--disable-workspace-trust",
            ]
        );
    }
}
