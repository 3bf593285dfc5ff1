use std::net::SocketAddr;

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::Response,
    middleware,
    routing::any,
};
use trace_tools::{access_log_middleware, category_session, text_response};
use tracing::{error, warn};

use crate::{orchestrator::Orchestrator, session::client_identity, transport::forward};

/// Data-plane router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so peers can be identified.
pub fn build_data_app(orchestrator: Orchestrator) -> Router {
    Router::new()
        .fallback(any(data_plane_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(orchestrator)
}

async fn data_plane_handler(
    State(orchestrator): State<Orchestrator>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response<Body> {
    let identity = client_identity(&peer);
    let session = match orchestrator.resolve_session(&identity) {
        Ok(session) => session,
        Err(err) if err.is_fatal() => {
            error!("{} {err}", category_session());
            orchestrator.report_fatal(&err);
            return text_response(err.status_code(), "internal server error");
        }
        Err(err) => {
            warn!("{} {err}", category_session());
            return text_response(err.status_code(), &err.to_string());
        }
    };

    match forward(session.channel(), orchestrator.dial_policy(), request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                "{} proxying to {} failed: {err}",
                category_session(),
                session.trace_id()
            );
            text_response(err.status_code(), "bad gateway")
        }
    }
}
