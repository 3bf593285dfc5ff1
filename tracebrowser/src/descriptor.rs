use std::{collections::BTreeMap, io, path::Path};

use serde::Serialize;

pub const DESCRIPTOR_DIR: &str = ".vscode";
pub const DESCRIPTOR_FILE: &str = "launch.json";

/// Editor launch configuration that replays the workspace's recorded trace.
#[derive(Clone, Debug, Serialize)]
pub struct LaunchDescriptor {
    pub version: String,
    pub configurations: Vec<LaunchConfiguration>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfiguration {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub request: String,
    pub mode: String,
    pub program: String,
    pub trace_dir_path: String,
    pub env: BTreeMap<String, String>,
    pub substitute_path: Vec<PathSubstitution>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PathSubstitution {
    pub from: String,
    pub to: String,
}

impl LaunchDescriptor {
    /// `project_package` is where the recorded binary's sources lived at build time.
    pub fn replay(project_package: &str, replay_path_env: &str) -> Self {
        let env = BTreeMap::from([
            ("DELVE_RR_REPLAY_FLAGS".to_string(), "-W".to_string()),
            ("PATH".to_string(), replay_path_env.to_string()),
        ]);
        Self {
            version: "0.2.0".to_string(),
            configurations: vec![LaunchConfiguration {
                name: "Replay trace".to_string(),
                kind: "go".to_string(),
                request: "launch".to_string(),
                mode: "replay".to_string(),
                program: "${workspaceFolder}/main.go".to_string(),
                trace_dir_path: "${workspaceFolder}/../../trace".to_string(),
                env,
                substitute_path: vec![
                    PathSubstitution {
                        from: "${workspaceFolder}".to_string(),
                        to: project_package.to_string(),
                    },
                    PathSubstitution {
                        from: "/usr/local/go/src".to_string(),
                        to: String::new(),
                    },
                ],
            }],
        }
    }
}

pub async fn write_descriptor(workspace: &Path, descriptor: &LaunchDescriptor) -> io::Result<()> {
    let dir = workspace.join(DESCRIPTOR_DIR);
    tokio::fs::create_dir_all(&dir).await?;
    let mut contents = serde_json::to_vec_pretty(descriptor).map_err(io::Error::other)?;
    contents.push(b'\n');
    tokio::fs::write(dir.join(DESCRIPTOR_FILE), contents).await
}
