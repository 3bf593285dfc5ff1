mod logging;
mod proxy;
mod tools;

pub use logging::{
    access_log_middleware, category_access, category_control, category_editor,
    category_pipeline, category_session, category_workspace, init as init_logging,
    method_label, status_label,
};
pub use proxy::{
    RelayError, is_hop_by_hop, origin_form, requested_upgrade, send_over, strip_hop_by_hop,
    text_response,
};
pub use tools::{CommandToolRunner, ToolError, ToolInvocation, ToolRunner, Toolchain};

/// Formats the `--version` line from the git metadata stamped in by `build.rs`.
pub fn binary_version_text(
    binary: &str,
    git_tag: Option<&str>,
    git_commit: Option<&str>,
    git_dirty: Option<&str>,
) -> String {
    let git_tag = git_tag.unwrap_or("untagged");
    let git_commit = git_commit.unwrap_or("unknown");
    let dirty = matches!(git_dirty.unwrap_or("false"), "true" | "1" | "yes" | "dirty");

    if dirty {
        format!("{binary} {git_tag} (dirty commit: {git_commit})")
    } else {
        format!("{binary} {git_tag}")
    }
}

/// Escapes text for use in HTML element content and quoted attribute values.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
