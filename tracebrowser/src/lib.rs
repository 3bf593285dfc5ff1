mod catalog;
mod config;
mod descriptor;
mod editor;
mod runtime;
mod workspace;

pub use catalog::{list_traces, render_index, workspace_link};
pub use config::{BrowserArgs, BrowserConfig, ConfigError, DEFAULT_REPLAY_PATH};
pub use descriptor::{
    DESCRIPTOR_DIR, DESCRIPTOR_FILE, LaunchConfiguration, LaunchDescriptor, PathSubstitution,
    write_descriptor,
};
pub use editor::{editor_args, spawn_editor};
pub use runtime::{SharedState, build_browser_app, trace_from_folder};
pub use workspace::{
    ARCHIVE_FILE, ProvisionError, Provisioner, WorkspaceHandle, WorkspaceLayout,
    validate_trace_name,
};
