use std::{env, sync::Arc};

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use trace_tools::{CommandToolRunner, Toolchain, binary_version_text, init_logging};
use tracebrowser::{BrowserArgs, SharedState, build_browser_app, spawn_editor};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if wants_version_flag() {
        println!("{}", version_text());
        return Ok(());
    }

    let config = BrowserArgs::parse().into_config()?;
    init_logging()?;
    info!("{}", version_text());

    std::fs::create_dir_all(&config.state_root)?;

    let tools = Arc::new(CommandToolRunner::new(Toolchain {
        tar: config.tar.clone(),
        git: config.git.clone(),
        ..Toolchain::default()
    }));
    let state = SharedState::new(&config, tools)?;

    let mut editor = spawn_editor(&config).map_err(|err| {
        error!(
            "failed to start editor {}: {err}",
            config.editor_bin.display()
        );
        err
    })?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("trace browser listening on http://{}", listener.local_addr()?);

    let server = axum::serve(listener, build_browser_app(state));
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = server => result?,
        status = editor.wait() => {
            let message = match status {
                Ok(status) => format!("editor exited: {status}"),
                Err(err) => format!("failed waiting on editor: {err}"),
            };
            error!("{message}");
            return Err(message.into());
        }
        _ = interrupt.recv() => info!("received SIGINT, shutting down"),
        _ = terminate.recv() => info!("received SIGTERM, shutting down"),
    }

    Ok(())
}

fn wants_version_flag() -> bool {
    env::args()
        .skip(1)
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
}

fn version_text() -> String {
    binary_version_text(
        env!("CARGO_PKG_NAME"),
        option_env!("TRACE_BUILD_GIT_TAG"),
        option_env!("TRACE_BUILD_GIT_COMMIT"),
        option_env!("TRACE_BUILD_GIT_DIRTY"),
    )
}
