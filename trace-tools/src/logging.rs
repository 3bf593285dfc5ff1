use std::{sync::OnceLock, time::Instant};

use axum::{body::Body, extract::Request, http::Response, middleware::Next};
use owo_colors::OwoColorize;
use supports_color::Stream;
use tracing::info;
use tracing_subscriber::EnvFilter;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let ansi = detect_ansi();
    let _ = ANSI_ENABLED.set(ansi);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

pub fn category_access() -> String {
    paint("ACCESS", |text| format!("{}", text.bright_cyan().bold()))
}

pub fn category_session() -> String {
    paint("SESSION", |text| format!("{}", text.bright_green().bold()))
}

pub fn category_pipeline() -> String {
    paint("PIPELINE", |text| format!("{}", text.bright_yellow().bold()))
}

pub fn category_control() -> String {
    paint("CONTROL", |text| format!("{}", text.bright_magenta().bold()))
}

pub fn category_workspace() -> String {
    paint("WORKSPACE", |text| format!("{}", text.bright_blue().bold()))
}

pub fn category_editor() -> String {
    paint("EDITOR", |text| format!("{}", text.bright_white().bold()))
}

pub fn method_label(method: &str) -> String {
    if !ansi_enabled() {
        return method.to_string();
    }

    match method {
        "GET" => format!("{}", method.bright_blue()),
        "POST" => format!("{}", method.bright_green()),
        "PUT" => format!("{}", method.bright_yellow()),
        "DELETE" => format!("{}", method.bright_red()),
        "PATCH" => format!("{}", method.bright_magenta()),
        _ => format!("{}", method.bright_white()),
    }
}

pub fn status_label(status: u16) -> String {
    let text = status.to_string();
    if !ansi_enabled() {
        return text;
    }

    match status {
        100..=199 => format!("{}", text.bright_blue()),
        200..=299 => format!("{}", text.bright_green()),
        300..=399 => format!("{}", text.bright_cyan()),
        400..=499 => format!("{}", text.bright_yellow()),
        _ => format!("{}", text.bright_red()),
    }
}

/// Logs one line per request once the inner service has produced a response.
pub async fn access_log_middleware(request: Request, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis();
    let status = response.status();

    info!(
        "{} {} {} {} {}ms",
        category_access(),
        method_label(method.as_str()),
        status_label(status.as_u16()),
        uri,
        elapsed_ms
    );

    response
}

fn paint(label: &str, colored: impl FnOnce(&str) -> String) -> String {
    if ansi_enabled() {
        colored(label)
    } else {
        label.to_string()
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    supports_color::on_cached(Stream::Stdout).is_some()
}
