use std::{env, net::SocketAddr, sync::Arc};

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use trace_tools::{CommandToolRunner, Toolchain, binary_version_text, init_logging};
use traceme::{
    Orchestrator, OrchestratorArgs, RecorderLauncher, build_control_app, build_data_app,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if wants_version_flag() {
        println!("{}", version_text());
        return Ok(());
    }

    let config = OrchestratorArgs::parse().into_config()?;
    init_logging()?;
    info!("{}", version_text());

    std::fs::create_dir_all(&config.trace_root)?;
    std::fs::create_dir_all(&config.socket_root)?;

    let launcher = Arc::new(RecorderLauncher::new(
        config.recorder.clone(),
        config.server_cmd.clone(),
    ));
    let tools = Arc::new(CommandToolRunner::new(Toolchain {
        recorder: config.recorder.clone(),
        tar: config.tar.clone(),
        ..Toolchain::default()
    }));
    let orchestrator = Orchestrator::new(config.clone(), launcher, tools);

    let data_listener = tokio::net::TcpListener::bind(config.data_addr).await?;
    let control_listener = tokio::net::TcpListener::bind(config.control_addr).await?;

    info!(
        "data-plane listening on http://{}",
        data_listener.local_addr()?
    );
    info!(
        "control-plane listening on http://{}",
        control_listener.local_addr()?
    );

    let data_server = axum::serve(
        data_listener,
        build_data_app(orchestrator.clone())
            .into_make_service_with_connect_info::<SocketAddr>(),
    );
    let control_server = axum::serve(control_listener, build_control_app(orchestrator.clone()));

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = data_server => result?,
        result = control_server => result?,
        message = orchestrator.fatal_error() => {
            error!("{message}");
            return Err(message.into());
        }
        _ = interrupt.recv() => {
            info!("received SIGINT, finalizing sessions...");
            orchestrator.shutdown().await;
        }
        _ = terminate.recv() => {
            info!("received SIGTERM, finalizing sessions...");
            orchestrator.shutdown().await;
        }
    }

    Ok(())
}

fn wants_version_flag() -> bool {
    env::args()
        .skip(1)
        .take_while(|arg| arg != "--")
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
