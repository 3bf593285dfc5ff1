use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response, StatusCode, header::HOST},
};
use thiserror::Error;
use tokio::{net::UnixStream, time::Instant};
use trace_tools::{RelayError, origin_form, requested_upgrade, send_over, strip_hop_by_hop};
use tracing::debug;

/// How long, and how often, to retry dialing a backend that is still starting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DialPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Error)]
pub enum DialError {
    #[error("backend at {} did not accept connections within {waited:?}", .path.display())]
    TimedOut {
        path: PathBuf,
        waited: Duration,
        #[source]
        last_error: Option<io::Error>,
    },
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Dial(#[from] DialError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl ForwardError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::BAD_GATEWAY
    }
}

/// Connects to `path`, retrying every `policy.interval` until `policy.timeout`
/// has fully elapsed.
pub async fn dial_with_retry(path: &Path, policy: DialPolicy) -> Result<UnixStream, DialError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match UnixStream::connect(path).await {
            Ok(stream) => {
                if attempts > 1 {
                    debug!(
                        "connected to {} after {attempts} attempts",
                        path.display()
                    );
                }
                return Ok(stream);
            }
            Err(err) => err,
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(DialError::TimedOut {
                path: path.to_path_buf(),
                waited: now - started,
                last_error: Some(last_error),
            });
        }
        tokio::time::sleep(policy.interval.min(deadline - now)).await;
    }
}

/// Sends `request` to the HTTP server listening on the unix socket at `channel`.
/// Upgrade requests stay connected to the backend after the `101` answer.
pub async fn forward(
    channel: &Path,
    policy: DialPolicy,
    request: Request<Body>,
) -> Result<Response<Body>, ForwardError> {
    let stream = dial_with_retry(channel, policy).await?;
    Ok(send_over(stream, backend_request(request)).await?)
}

fn backend_request(request: Request<Body>) -> Request<Body> {
    let (mut parts, body) = request.into_parts();
    parts.uri = origin_form(&parts.uri);
    let upgrade = requested_upgrade(&parts.headers);
    strip_hop_by_hop(&mut parts.headers, upgrade);
    parts
        .headers
        .insert(HOST, HeaderValue::from_static("localhost"));
    Request::from_parts(parts, body)
}
