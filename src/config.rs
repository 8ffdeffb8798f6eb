//! Runtime configuration for the supervisor.
//!
//! Loaded from `warden.toml` in the supervised repository root. A missing
//! file means defaults; a malformed file is an error.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One named verification check, run in order inside the sandbox.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    pub name: String,
    pub command: Vec<String>,
}

/// Runtime configuration for the warden supervisor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the supervised (live) source tree.
    pub repo_root: PathBuf,
    /// Workspace holding the queue, task logs, backups, and sandboxes.
    pub workspace: PathBuf,
    /// Shell command that launches the supervised service in `repo_root`.
    pub service_command: String,
    pub poll_interval: Duration,
    /// Wall-clock budget for the whole develop-verify loop.
    pub build_deadline: Duration,
    /// Wait after service start before liveness is evaluated.
    pub health_grace: Duration,
    /// Wait for graceful termination before escalating to a kill.
    pub stop_grace: Duration,
    /// External generation tool and its fixed arguments; the composed
    /// prompt is appended as the final argument.
    pub generate_program: String,
    pub generate_args: Vec<String>,
    pub checks: Vec<CheckConfig>,
}

/// Raw TOML structure for `warden.toml`.
#[derive(Debug, Deserialize)]
struct WardenToml {
    supervisor: Option<SupervisorSection>,
    service: Option<ServiceSection>,
    generate: Option<GenerateSection>,
    check: Option<Vec<CheckConfig>>,
}

#[derive(Debug, Deserialize)]
struct SupervisorSection {
    workspace: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
    build_deadline_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ServiceSection {
    command: Option<String>,
    health_grace_secs: Option<u64>,
    stop_grace_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GenerateSection {
    program: Option<String>,
    args: Option<Vec<String>>,
}

impl Config {
    /// Defaults for a repository root, without reading any file.
    pub fn defaults(repo_root: PathBuf) -> Self {
        Self {
            workspace: repo_root.join(".warden"),
            repo_root,
            service_command: "cargo run --release".to_string(),
            poll_interval: Duration::from_secs(3),
            build_deadline: Duration::from_secs(30 * 60),
            health_grace: Duration::from_secs(20),
            stop_grace: Duration::from_secs(20),
            generate_program: "codex".to_string(),
            generate_args: vec![
                "exec".to_string(),
                "--sandbox".to_string(),
                "workspace-write".to_string(),
                "--ask-for-approval".to_string(),
                "never".to_string(),
            ],
            checks: vec![
                CheckConfig {
                    name: "check".to_string(),
                    command: vec![
                        "cargo".to_string(),
                        "check".to_string(),
                        "--quiet".to_string(),
                    ],
                },
                CheckConfig {
                    name: "test".to_string(),
                    command: vec![
                        "cargo".to_string(),
                        "test".to_string(),
                        "--quiet".to_string(),
                    ],
                },
            ],
        }
    }

    /// Load configuration from `warden.toml` in `repo_root`.
    /// Returns defaults if the file doesn't exist.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let repo_root = repo_root
            .canonicalize()
            .context("Failed to resolve repository root")?;
        let config_path = repo_root.join("warden.toml");
        let mut config = Self::defaults(repo_root.clone());
        if !config_path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let toml: WardenToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        if let Some(section) = toml.supervisor {
            if let Some(workspace) = section.workspace {
                config.workspace = if workspace.is_absolute() {
                    workspace
                } else {
                    repo_root.join(workspace)
                };
            }
            if let Some(secs) = section.poll_interval_secs {
                config.poll_interval = Duration::from_secs(secs);
            }
            if let Some(secs) = section.build_deadline_secs {
                config.build_deadline = Duration::from_secs(secs);
            }
        }
        if let Some(section) = toml.service {
            if let Some(command) = section.command {
                config.service_command = command;
            }
            if let Some(secs) = section.health_grace_secs {
                config.health_grace = Duration::from_secs(secs);
            }
            if let Some(secs) = section.stop_grace_secs {
                config.stop_grace = Duration::from_secs(secs);
            }
        }
        if let Some(section) = toml.generate {
            if let Some(program) = section.program {
                config.generate_program = program;
            }
            if let Some(args) = section.args {
                config.generate_args = args;
            }
        }
        if let Some(checks) = toml.check {
            config.checks = checks;
        }

        Ok(config)
    }
}
