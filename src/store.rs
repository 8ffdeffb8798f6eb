//! Durable task storage: queue, task logs, patch backups, and sandbox roots.
//!
//! This is the only layer that touches the workspace on disk. Queue entries
//! and task logs are written with a temp-then-rename pattern so a crash
//! mid-write never leaves a torn file behind; the task log is the audit
//! trail external observers read, and it is rewritten wholesale on every
//! status transition so it always reflects the latest known state.

use crate::errors::WardenError;
use crate::request::Request;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Task lifecycle states as they appear in the task log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    InProgress,
    Success,
    Failed,
    Rejected,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-backed queue plus per-task audit logs and artifact areas.
pub struct TaskStore {
    pub root: PathBuf,
    pub queue: PathBuf,
    pub tasks: PathBuf,
    pub logs: PathBuf,
    pub backups: PathBuf,
    pub sandboxes: PathBuf,
}

impl TaskStore {
    /// Open (creating if needed) the store rooted at `<workspace>/upgrades`.
    pub fn open(workspace: &Path) -> Result<Self> {
        let root = workspace.join("upgrades");
        let store = Self {
            queue: root.join("queue"),
            tasks: root.join("tasks"),
            logs: root.join("logs"),
            backups: root.join("backups"),
            sandboxes: root.join("sandboxes"),
            root,
        };
        for dir in [
            &store.queue,
            &store.tasks,
            &store.logs,
            &store.backups,
            &store.sandboxes,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
        }
        // A self-ignoring workspace keeps the clean-tree gate honest when
        // the workspace lives inside the supervised repository.
        let ignore = workspace.join(".gitignore");
        if !ignore.exists() {
            fs::write(&ignore, "*\n")
                .with_context(|| format!("Failed to write {}", ignore.display()))?;
        }
        Ok(store)
    }

    /// Persist a request to the queue and write its QUEUED task log.
    /// Returns the queue entry path, the handle submitters get back.
    pub fn enqueue(&self, req: &Request) -> Result<PathBuf> {
        let entry = self.queue.join(format!("{}.json", req.id));
        let body = serde_json::to_vec_pretty(req).context("Failed to serialize request")?;
        self.write_atomic(&entry, &body)?;
        self.write_status(req, TaskStatus::Queued, &["Task queued.".to_string()])?;
        Ok(entry)
    }

    /// Pending queue entries, oldest first. Ids are time-prefixed, so a
    /// name sort is FIFO order.
    pub fn list_pending(&self) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.queue)
            .with_context(|| format!("Failed to read queue at {}", self.queue.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        entries.sort();
        Ok(entries)
    }

    pub fn load(&self, entry: &Path) -> Result<Request> {
        let raw = fs::read_to_string(entry)
            .with_context(|| format!("Failed to read queue entry {}", entry.display()))?;
        let req = serde_json::from_str(&raw).map_err(|source| WardenError::QueueCorrupt {
            path: entry.to_path_buf(),
            source,
        })?;
        Ok(req)
    }

    /// Remove a consumed queue entry. Idempotent: an absent entry is fine.
    pub fn pop(&self, entry: &Path) -> Result<()> {
        match fs::remove_file(entry) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove queue entry {}", entry.display()))
            }
        }
    }

    /// Rewrite the task log for `req` with the given status and notes.
    /// Full overwrite: the log always shows the latest state.
    pub fn write_status(&self, req: &Request, status: TaskStatus, notes: &[String]) -> Result<()> {
        let mut content = vec![
            format!("# Upgrade Task {}", req.id),
            String::new(),
            format!("- Title: {}", req.title),
            format!("- Scope: {}", req.scope),
            format!("- Requested By: {}", req.requested_by),
            format!("- Created At (UTC): {}", req.created_at.to_rfc3339()),
            format!("- Last Updated (UTC): {}", Utc::now().to_rfc3339()),
            format!("- Status: {status}"),
            String::new(),
            "## Prompt".to_string(),
            String::new(),
            req.prompt.clone(),
            String::new(),
            "## Notes".to_string(),
        ];
        for note in notes {
            content.push(format!("- {note}"));
        }
        let path = self.task_log(&req.id);
        self.write_atomic(&path, (content.join("\n") + "\n").as_bytes())
    }

    pub fn task_log(&self, id: &str) -> PathBuf {
        self.tasks.join(format!("{id}.md"))
    }

    pub fn forward_patch(&self, id: &str) -> PathBuf {
        self.backups.join(format!("{id}-forward.patch"))
    }

    pub fn rollback_patch(&self, id: &str) -> PathBuf {
        self.backups.join(format!("{id}-rollback.patch"))
    }

    pub fn sandbox_dir(&self, id: &str) -> PathBuf {
        self.sandboxes.join(id)
    }

    pub fn service_log(&self) -> PathBuf {
        self.logs.join("service.log")
    }

    pub fn service_pid_file(&self) -> PathBuf {
        self.logs.join("service.pid")
    }

    /// Write `bytes` to `path` via a same-directory temp file and rename,
    /// so readers only ever see a complete prior or complete new version.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .with_context(|| format!("No parent directory for {}", path.display()))?;
        let name = path
            .file_name()
            .with_context(|| format!("No file name in {}", path.display()))?;
        let tmp = dir.join(format!(".{}.tmp", name.to_string_lossy()));
        fs::write(&tmp, bytes)
            .with_context(|| format!("Failed to write temp file {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to rename {} into place", tmp.display()))?;
        Ok(())
    }
}
