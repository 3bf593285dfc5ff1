use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    extract::{Query, Request, State},
    http::{
        HeaderMap, HeaderValue, Method, Response, StatusCode, Uri,
        header::{CONTENT_TYPE, HOST},
    },
    middleware,
    routing::any,
};
use serde::Deserialize;
use tokio::net::TcpStream;
use trace_tools::{
    ToolRunner, access_log_middleware, category_editor, category_workspace, is_hop_by_hop,
    origin_form, requested_upgrade, send_over, strip_hop_by_hop, text_response,
};
use tracing::{error, warn};

use crate::{
    catalog::{list_traces, render_index},
    config::BrowserConfig,
    descriptor::LaunchDescriptor,
    workspace::{Provisioner, WorkspaceLayout},
};

#[derive(Clone)]
pub struct SharedState {
    pub provisioner: Arc<Provisioner>,
    pub state_prefix: String,
    pub editor_upstream: String,
    pub client: reqwest::Client,
}

impl SharedState {
    pub fn new(config: &BrowserConfig, tools: Arc<dyn ToolRunner>) -> reqwest::Result<Self> {
        let layout = WorkspaceLayout::new(
            config.trace_root.clone(),
            config.state_root.clone(),
            config.project_name.clone(),
        );
        let descriptor =
            LaunchDescriptor::replay(&config.project_package, &config.replay_path_env);
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            provisioner: Arc::new(Provisioner::new(
                layout,
                config.code_origin.clone(),
                descriptor,
                tools,
            )),
            state_prefix: config.state_root.to_string_lossy().into_owned(),
            editor_upstream: upstream_authority(config.editor_addr),
            client,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct FolderQuery {
    folder: Option<String>,
}

pub fn build_browser_app(state: SharedState) -> Router {
    Router::new()
        .fallback(any(browser_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}

async fn browser_handler(State(state): State<SharedState>, request: Request) -> Response<Body> {
    let (parts, body) = request.into_parts();
    if parts.uri.path() == "/" && parts.uri.query().unwrap_or("").is_empty() {
        return index_response(&state, &parts.headers, &parts.uri).await;
    }

    let folder = Query::<FolderQuery>::try_from_uri(&parts.uri)
        .map(|Query(query)| query)
        .unwrap_or_default()
        .folder;
    if let Some(trace) = folder
        .as_deref()
        .and_then(|folder| trace_from_folder(folder, &state.state_prefix))
    {
        if let Err(err) = state.provisioner.resolve_workspace(trace).await {
            if err.status_code() == StatusCode::NOT_FOUND {
                warn!("{} {err}", category_workspace());
                return text_response(StatusCode::NOT_FOUND, "not found");
            }
            error!("{} {err}", category_workspace());
            return text_response(err.status_code(), &err.to_string());
        }
    }

    if requested_upgrade(&parts.headers).is_some() {
        return relay_upgrade_to_editor(&state, Request::from_parts(parts, body)).await;
    }

    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("{} failed to read request body: {err}", category_editor());
            return text_response(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };

    proxy_to_editor(&state, parts.method, parts.uri, parts.headers, body_bytes).await
}

async fn index_response(state: &SharedState, headers: &HeaderMap, uri: &Uri) -> Response<Body> {
    let layout = state.provisioner.layout();
    let traces = match list_traces(layout.trace_root()).await {
        Ok(traces) => traces,
        Err(err) => {
            error!("{} failed to read trace directory: {err}", category_workspace());
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Failed to read trace directory: {err}"),
            );
        }
    };

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or("localhost");
    let page = render_index(host, layout.state_root(), layout.project_name(), &traces);

    let mut response = Response::new(Body::from(page));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Trace named by a `folder` value under `state_prefix`, or `None` for pass-through.
pub fn trace_from_folder<'a>(folder: &'a str, state_prefix: &str) -> Option<&'a str> {
    let relative = folder.strip_prefix(state_prefix)?.strip_prefix('/')?;
    Some(relative.split('/').next().unwrap_or(""))
}

async fn proxy_to_editor(
    state: &SharedState,
    method: Method,
    uri: Uri,
    request_headers: HeaderMap,
    request_body: Bytes,
) -> Response<Body> {
    let path_and_query = uri
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    let upstream_url = format!("http://{}{path_and_query}", state.editor_upstream);

    let mut outbound = state
        .client
        .request(method, upstream_url)
        .body(request_body.to_vec());
    for (name, value) in &request_headers {
        if !is_hop_by_hop(name) {
            outbound = outbound.header(name, value);
        }
    }

    let upstream_response = match outbound.send().await {
        Ok(response) => response,
        Err(err) => {
            warn!("{} editor request failed: {err}", category_editor());
            return text_response(StatusCode::BAD_GATEWAY, "bad gateway");
        }
    };

    let status = upstream_response.status();
    let upstream_headers = upstream_response.headers().clone();
    let body = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                "{} failed reading editor response body: {err}",
                category_editor()
            );
            return text_response(StatusCode::BAD_GATEWAY, "bad gateway");
        }
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    for (name, value) in &upstream_headers {
        if !is_hop_by_hop(name) {
            response.headers_mut().append(name, value.clone());
        }
    }
    response
}

/// Hands an upgrade handshake to the editor over a raw HTTP/1 connection and
/// keeps both sides joined once it switches protocols.
async fn relay_upgrade_to_editor(state: &SharedState, request: Request) -> Response<Body> {
    let stream = match TcpStream::connect(state.editor_upstream.as_str()).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("{} editor connection failed: {err}", category_editor());
            return text_response(StatusCode::BAD_GATEWAY, "bad gateway");
        }
    };

    let (mut parts, body) = request.into_parts();
    parts.uri = origin_form(&parts.uri);
    let upgrade = requested_upgrade(&parts.headers);
    strip_hop_by_hop(&mut parts.headers, upgrade);

    match send_over(stream, Request::from_parts(parts, body)).await {
        Ok(response) => response,
        Err(err) => {
            warn!("{} editor upgrade failed: {err}", category_editor());
            text_response(StatusCode::BAD_GATEWAY, "bad gateway")
        }
    }
}

fn upstream_authority(addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("localhost:{}", addr.port())
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_under_state_dir_names_a_trace() {
        assert_eq!(
            trace_from_folder("/var/state/t1/code/app", "/var/state"),
            Some("t1")
        );
        assert_eq!(trace_from_folder("/var/state/", "/var/state"), Some(""));
        assert_eq!(trace_from_folder("/home/dev/project", "/var/state"), None);
        assert_eq!(trace_from_folder("/var/state2/t1", "/var/state"), None);
    }

    #[test]
    fn unspecified_editor_address_is_dialed_on_loopback() {
        assert_eq!(
            upstream_authority("0.0.0.0:8081".parse().expect("addr")),
            "localhost:8081"
        );
        assert_eq!(
            upstream_authority("127.0.0.1:9000".parse().expect("addr")),
            "127.0.0.1:9000"
        );
    }
}
