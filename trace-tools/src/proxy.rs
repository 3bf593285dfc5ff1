use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri,
        header::{CONNECTION, UPGRADE},
    },
};
use hyper::{client::conn::http1, upgrade::OnUpgrade};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("backend handshake failed: {0}")]
    Handshake(#[source] hyper::Error),
    #[error("backend request failed: {0}")]
    Send(#[source] hyper::Error),
}

pub fn text_response(status: StatusCode, text: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(text.to_string()));
    *response.status_mut() = status;
    response
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Protocol named by `Upgrade` when `Connection` carries the `upgrade` token.
pub fn requested_upgrade(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if !wants_upgrade {
        return None;
    }
    headers.get(UPGRADE).cloned()
}

/// Drops hop-by-hop headers. With `upgrade` set, the connection is re-marked
/// as upgrading to that protocol.
pub fn strip_hop_by_hop(headers: &mut HeaderMap, upgrade: Option<HeaderValue>) {
    let hop_by_hop: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in hop_by_hop {
        headers.remove(&name);
    }
    if let Some(protocol) = upgrade {
        headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
        headers.insert(UPGRADE, protocol);
    }
}

pub fn origin_form(uri: &Uri) -> Uri {
    uri.path_and_query()
        .and_then(|value| value.as_str().parse::<Uri>().ok())
        .unwrap_or_else(|| Uri::from_static("/"))
}

/// Sends `request` on a new HTTP/1 connection over `stream`.
///
/// When the request asks for an upgrade and the backend answers `101`, the
/// client's upgraded connection is spliced to the backend's in the background.
pub async fn send_over<S>(stream: S, mut request: Request<Body>) -> Result<Response<Body>, RelayError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let client_upgrade = requested_upgrade(request.headers())
        .is_some()
        .then(|| hyper::upgrade::on(&mut request));

    let (mut sender, connection) = http1::handshake::<_, Body>(TokioIo::new(stream))
        .await
        .map_err(RelayError::Handshake)?;
    tokio::spawn(async move {
        if let Err(err) = connection.with_upgrades().await {
            debug!("backend connection closed with error: {err}");
        }
    });

    let mut response = sender
        .send_request(request)
        .await
        .map_err(RelayError::Send)?;

    let switched = response.status() == StatusCode::SWITCHING_PROTOCOLS;
    match client_upgrade {
        Some(client_upgrade) if switched => {
            let protocol = response.headers().get(UPGRADE).cloned();
            strip_hop_by_hop(response.headers_mut(), protocol);
            let backend_upgrade = hyper::upgrade::on(&mut response);
            tokio::spawn(splice(client_upgrade, backend_upgrade));
        }
        _ => strip_hop_by_hop(response.headers_mut(), None),
    }

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}

async fn splice(client: OnUpgrade, backend: OnUpgrade) {
    let (client, backend) = match tokio::try_join!(client, backend) {
        Ok(pair) => pair,
        Err(err) => {
            debug!("connection upgrade failed: {err}");
            return;
        }
    };
    let mut client = TokioIo::new(client);
    let mut backend = TokioIo::new(backend);
    if let Err(err) = tokio::io::copy_bidirectional(&mut client, &mut backend).await {
        debug!("upgraded connection closed with error: {err}");
    }
}
