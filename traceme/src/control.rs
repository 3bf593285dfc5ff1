use axum::{
    Form, Json, Router,
    body::Body,
    extract::State,
    http::{Response, StatusCode},
    middleware,
    response::{Html, IntoResponse, Redirect},
    routing::get,
};
use serde::Deserialize;
use trace_tools::{access_log_middleware, category_control, escape_html, text_response};
use tracing::{info, warn};

use crate::{
    orchestrator::Orchestrator,
    session::{SessionSummary, format_age},
};

#[derive(Debug, Deserialize)]
pub struct ControlForm {
    pub action: Option<String>,
    #[serde(rename = "clientIp")]
    pub client_ip: Option<String>,
}

/// Operator surface: listing at `GET /`, actions at `POST /`, JSON at `GET /sessions`.
pub fn build_control_app(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/", get(list_sessions_handler).post(control_action_handler))
        .route("/sessions", get(sessions_json_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(orchestrator)
}

async fn list_sessions_handler(State(orchestrator): State<Orchestrator>) -> Html<String> {
    Html(render_sessions_page(&orchestrator.list_sessions()))
}

async fn sessions_json_handler(
    State(orchestrator): State<Orchestrator>,
) -> Json<Vec<SessionSummary>> {
    Json(orchestrator.list_sessions())
}

async fn control_action_handler(
    State(orchestrator): State<Orchestrator>,
    Form(form): Form<ControlForm>,
) -> Response<Body> {
    match form.action.as_deref() {
        Some("end") => {
            let Some(client_ip) = form.client_ip.filter(|value| !value.trim().is_empty()) else {
                warn!("{} end requested without clientIp", category_control());
                return text_response(StatusCode::BAD_REQUEST, "missing clientIp");
            };
            info!("{} ending trace for {client_ip}", category_control());
            match orchestrator.end_session(&client_ip) {
                Ok(()) => Redirect::to("/").into_response(),
                Err(err) => {
                    warn!("{} {err}", category_control());
                    text_response(err.status_code(), &err.to_string())
                }
            }
        }
        other => {
            let action = other.unwrap_or("");
            warn!("{} rejected action {action:?}", category_control());
            text_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid action: {action}"),
            )
        }
    }
}

pub fn render_sessions_page(sessions: &[SessionSummary]) -> String {
    let mut rows = String::new();
    for session in sessions {
        let identity = escape_html(&session.identity);
        rows.push_str(&format!(
            concat!(
                "\t\t<tr>\n",
                "\t\t\t<td>{identity}</td>\n",
                "\t\t\t<td>{trace_id}</td>\n",
                "\t\t\t<td>{age}</td>\n",
                "\t\t\t<td>\n",
                "\t\t\t\t<form action=\"/\" method=\"post\">\n",
                "\t\t\t\t\t<input type=\"hidden\" name=\"clientIp\" value=\"{identity}\">\n",
                "\t\t\t\t\t<button type=\"submit\" name=\"action\" value=\"end\">End</button>\n",
                "\t\t\t\t</form>\n",
                "\t\t\t</td>\n",
                "\t\t</tr>\n",
            ),
            identity = identity,
            trace_id = escape_html(&session.trace_id),
            age = format_age(session.age),
        ));
    }

    format!(
        concat!(
            "<!DOCTYPE html>\n",
            "<html>\n",
            "<head>\n",
            "\t<title>In-progress Traces</title>\n",
            "</head>\n",
            "<body>\n",
            "\t<h1>In-progress Traces</h1>\n",
            "\t<table>\n",
            "\t\t<tr>\n",
            "\t\t\t<th>Client IP</th>\n",
            "\t\t\t<th>Trace</th>\n",
            "\t\t\t<th>Age</th>\n",
            "\t\t\t<th>Actions</th>\n",
            "\t\t</tr>\n",
            "{rows}",
            "\t</table>\n",
            "</body>\n",
            "</html>\n",
        ),
        rows = rows
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn page_lists_each_session_with_end_button() {
        let page = render_sessions_page(&[SessionSummary {
            identity: "10.0.0.5".to_string(),
            trace_id: "10.0.0.5-2024-01-01-00-00-00".to_string(),
            age: Duration::from_secs(65),
        }]);
        assert!(page.contains("<td>10.0.0.5</td>"));
        assert!(page.contains("<td>1m5s</td>"));
        assert!(page.contains("name=\"clientIp\" value=\"10.0.0.5\""));
        assert!(page.contains("value=\"end\""));
    }
}
