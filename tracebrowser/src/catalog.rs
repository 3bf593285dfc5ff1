use std::{io, path::Path};

use trace_tools::escape_html;

/// Names of the visible trace directories under `trace_root`, sorted.
pub async fn list_traces(trace_root: &Path) -> io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(trace_root).await?;
    let mut traces = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        traces.push(name);
    }
    traces.sort();
    Ok(traces)
}

/// Link that opens the trace's workspace in the editor behind `host`.
pub fn workspace_link(host: &str, state_root: &Path, trace: &str, project_name: &str) -> String {
    format!(
        "http://{host}/?folder={}/{trace}/code/{project_name}",
        state_root.display()
    )
}

pub fn render_index(host: &str, state_root: &Path, project_name: &str, traces: &[String]) -> String {
    let mut items = String::new();
    for trace in traces {
        let link = workspace_link(host, state_root, trace, project_name);
        items.push_str(&format!(
            "\t\t<li><a href=\"{}\">{}</a></li>\n",
            escape_html(&link),
            escape_html(trace)
        ));
    }

    format!(
        concat!(
            "<!DOCTYPE html>\n",
            "<html>\n",
            "<head>\n",
            "\t<title>Trace Browser</title>\n",
            "</head>\n",
            "<body>\n",
            "\t<h1>Available Traces</h1>\n",
            "\t<ul>\n",
            "{items}",
            "\t</ul>\n",
            "</body>\n",
            "</html>\n",
        ),
        items = items
    )
}
