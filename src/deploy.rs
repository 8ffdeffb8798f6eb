//! Deploy/rollback engine: patch capture, index-aware apply, health-gated
//! cutover, and automatic reversal.
//!
//! Every step gates on the previous one. The rollback patch is captured
//! from the live tree's staged diff *after* the forward apply, so it
//! reflects the realized change set rather than a precomputed negation.

use crate::config::Config;
use crate::exec;
use crate::request::Request;
use crate::service::ServiceController;
use crate::store::TaskStore;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of a deploy attempt, with phase-by-phase notes.
#[derive(Debug)]
pub struct DeployOutcome {
    pub deployed: bool,
    pub notes: Vec<String>,
}

impl DeployOutcome {
    fn failed(notes: Vec<String>) -> Self {
        Self {
            deployed: false,
            notes,
        }
    }
}

/// Convert the sandbox's changes into a patch, apply it to the live tree,
/// and cut the service over. On health failure the forward patch is
/// reverse-applied and the previous service restored.
pub async fn run(
    config: &Config,
    store: &TaskStore,
    service: &mut ServiceController,
    req: &Request,
    sandbox_dir: &Path,
) -> DeployOutcome {
    let mut notes = Vec::new();
    let forward = store.forward_patch(&req.id);
    let forward_str = forward.to_string_lossy().into_owned();

    let diff = exec::run_cmd(
        "git",
        ["diff", "--binary", "HEAD"],
        sandbox_dir,
        GIT_TIMEOUT,
    )
    .await;
    if !diff.ok {
        notes.push("Failed to export candidate patch.".to_string());
        notes.push(exec::trim_output(&diff.combined(), 600));
        return DeployOutcome::failed(notes);
    }
    if diff.stdout.trim().is_empty() {
        notes.push("No code changes were produced.".to_string());
        return DeployOutcome::failed(notes);
    }

    if let Err(e) = store.write_atomic(&forward, diff.stdout.as_bytes()) {
        notes.push(format!("Failed to persist forward patch: {e:#}"));
        return DeployOutcome::failed(notes);
    }
    notes.push(format!("Saved forward patch: {}", forward.display()));

    let apply = exec::run_cmd(
        "git",
        ["apply", "--index", forward_str.as_str()],
        &config.repo_root,
        GIT_TIMEOUT,
    )
    .await;
    if !apply.ok {
        notes.push("Failed to apply forward patch to live tree.".to_string());
        notes.push(exec::trim_output(&apply.combined(), 800));
        return DeployOutcome::failed(notes);
    }

    let reverse = exec::run_cmd(
        "git",
        ["diff", "--binary", "--cached"],
        &config.repo_root,
        GIT_TIMEOUT,
    )
    .await;
    if reverse.ok && !reverse.stdout.trim().is_empty() {
        let rollback = store.rollback_patch(&req.id);
        match store.write_atomic(&rollback, reverse.stdout.as_bytes()) {
            Ok(()) => notes.push(format!("Saved rollback patch: {}", rollback.display())),
            Err(e) => warn!(error = %e, "failed to persist rollback patch"),
        }
    }

    // Cutover: restart the service from the upgraded tree.
    info!(id = %req.id, "cutting over to upgraded tree");
    service.stop().await;
    if service.start().await {
        notes.push("New service instance healthy; cutover complete.".to_string());
        return DeployOutcome {
            deployed: true,
            notes,
        };
    }

    // Roll back on health failure.
    notes.push("New service instance failed health check; starting rollback.".to_string());
    warn!(id = %req.id, "health check failed, rolling back");
    let undo = exec::run_cmd(
        "git",
        ["apply", "-R", "--index", forward_str.as_str()],
        &config.repo_root,
        GIT_TIMEOUT,
    )
    .await;
    if !undo.ok {
        warn!(
            output = %exec::trim_output(&undo.combined(), 300),
            "reverse apply reported a problem"
        );
    }
    service.stop().await;
    if service.start().await {
        notes.push("Rollback succeeded; previous service restored.".to_string());
    } else {
        notes.push(
            "Rollback failed to restore service automatically; manual intervention needed."
                .to_string(),
        );
    }
    DeployOutcome::failed(notes)
}
