//! Branch-scoped git worktree sandboxes, one per task.
//!
//! A sandbox is an isolated working copy of the live tree rooted at HEAD.
//! Teardown is unconditional and never raises: a task must not be able to
//! leave its worktree or branch behind by failing.

use crate::errors::WardenError;
use crate::exec;
use crate::request::Request;
use crate::store::TaskStore;
use anyhow::{Context, Result};
use git2::{Repository, StatusOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// An isolated working copy of the live tree for one task.
pub struct Sandbox {
    pub dir: PathBuf,
    pub branch: String,
}

/// Convert a title to a branch-safe slug, limited to `max_len` characters.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        return "upgrade".to_string();
    }
    if slug.len() > max_len {
        let mut end = max_len;
        while !slug.is_char_boundary(end) {
            end -= 1;
        }
        slug[..end].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// Create a worktree at the store's sandbox directory for this task,
/// on a fresh branch rooted at HEAD.
pub async fn create(repo_root: &Path, store: &TaskStore, req: &Request) -> Result<Sandbox> {
    let branch = format!(
        "warden/upgrade-{}-{}",
        slugify(&req.title, 40),
        req.id_suffix()
    );
    let dir = store.sandbox_dir(&req.id);
    let dir_str = dir.to_string_lossy().into_owned();
    let result = exec::run_cmd(
        "git",
        [
            "worktree",
            "add",
            "-B",
            branch.as_str(),
            dir_str.as_str(),
            "HEAD",
        ],
        repo_root,
        GIT_TIMEOUT,
    )
    .await;
    if !result.ok {
        return Err(WardenError::WorktreeCreate {
            output: exec::trim_output(&result.combined(), 600),
        }
        .into());
    }
    debug!(branch = %branch, dir = %dir.display(), "sandbox created");
    Ok(Sandbox { dir, branch })
}

/// Remove the worktree and its branch. Never fails: teardown problems are
/// logged and swallowed so they cannot mask the task's real outcome.
pub async fn remove(repo_root: &Path, sandbox: &Sandbox) {
    let dir_str = sandbox.dir.to_string_lossy().into_owned();
    let result = exec::run_cmd(
        "git",
        ["worktree", "remove", "--force", dir_str.as_str()],
        repo_root,
        GIT_TIMEOUT,
    )
    .await;
    if !result.ok {
        warn!(
            dir = %sandbox.dir.display(),
            output = %exec::trim_output(&result.combined(), 300),
            "failed to remove sandbox worktree"
        );
    }
    let result = exec::run_cmd(
        "git",
        ["branch", "-D", sandbox.branch.as_str()],
        repo_root,
        GIT_TIMEOUT,
    )
    .await;
    if !result.ok {
        debug!(branch = %sandbox.branch, "sandbox branch already gone");
    }
}

/// Check that the live tree has no uncommitted changes. Returns the clean
/// flag and a short detail string for the task log.
pub fn live_tree_clean(repo_root: &Path) -> Result<(bool, String)> {
    let repo = Repository::open(repo_root).context("Failed to open git repository")?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).include_ignored(false);
    let statuses = repo
        .statuses(Some(&mut opts))
        .context("Failed to read git status")?;
    if statuses.is_empty() {
        return Ok((true, "clean".to_string()));
    }
    let dirty: Vec<String> = statuses
        .iter()
        .filter_map(|entry| entry.path().map(str::to_string))
        .collect();
    Ok((false, exec::trim_output(&dirty.join(", "), 500)))
}
