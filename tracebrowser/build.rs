use std::{env, process::Command};

const STAMPS: [(&str, &[&str]); 3] = [
    ("TRACE_BUILD_GIT_TAG", &["describe", "--tags", "--exact-match"]),
    ("TRACE_BUILD_GIT_COMMIT", &["rev-parse", "--short=12", "HEAD"]),
    ("TRACE_BUILD_GIT_DIRTY", &["status", "--porcelain", "--untracked-files=no"]),
];

fn main() {
    for (name, git_args) in STAMPS {
        println!("cargo:rerun-if-env-changed={name}");
        let value = env::var(name).unwrap_or_else(|_| from_git(name, git_args));
        println!("cargo:rustc-env={name}={value}");
    }
}

fn from_git(name: &str, git_args: &[&str]) -> String {
    let output = Command::new("git")
        .args(git_args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|text| text.trim().to_string());

    match (name, output) {
        ("TRACE_BUILD_GIT_DIRTY", Some(status)) => (!status.is_empty()).to_string(),
        ("TRACE_BUILD_GIT_DIRTY", None) => "false".to_string(),
        (_, Some(value)) if !value.is_empty() => value,
        ("TRACE_BUILD_GIT_TAG", _) => "untagged".to_string(),
        _ => "unknown".to_string(),
    }
}
