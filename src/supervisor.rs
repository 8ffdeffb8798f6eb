//! The top-level polling loop: keep the service alive, drain the queue one
//! task at a time, and drive each task through sandbox, develop-verify,
//! deploy, and teardown.

use crate::config::Config;
use crate::deploy;
use crate::develop;
use crate::request::{Request, Scope};
use crate::sandbox::{self, Sandbox};
use crate::service::ServiceController;
use crate::store::{TaskStatus, TaskStore};
use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Read-only snapshot of supervisor state for status queries.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub service_running: bool,
    pub pending_tasks: usize,
    pub oldest_pending: Option<String>,
    pub service_log: PathBuf,
    pub tasks_dir: PathBuf,
}

pub struct Supervisor {
    config: Config,
    store: TaskStore,
    service: ServiceController,
}

impl Supervisor {
    pub fn new(config: Config) -> Result<Self> {
        let store = TaskStore::open(&config.workspace)?;
        let service = ServiceController::new(&config, &store);
        Ok(Self {
            config,
            store,
            service,
        })
    }

    /// Queue a request. The submitter gets the queue entry path back;
    /// outcomes are observed through the task log only.
    pub fn submit(&self, req: &Request) -> Result<PathBuf> {
        self.store.enqueue(req)
    }

    /// Run the polling loop until the process is terminated.
    pub async fn run_forever(&mut self) -> Result<()> {
        info!(
            workspace = %self.config.workspace.display(),
            repo = %self.config.repo_root.display(),
            "supervisor started"
        );
        self.ensure_service().await;

        loop {
            self.ensure_service().await;
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "polling cycle failed");
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Start the service if no live instance exists. Returns liveness.
    pub async fn ensure_service(&mut self) -> bool {
        self.service.ensure_alive().await
    }

    /// Process at most one pending task. Returns whether one was taken.
    ///
    /// Faults raised while processing are recorded as FAILED and the queue
    /// entry is still removed: one attempt per submission, a human resubmits.
    /// The pop must not depend on the task log being writable, or a broken
    /// log directory would wedge the queue on one task forever.
    pub async fn poll_once(&mut self) -> Result<bool> {
        let pending = self.store.list_pending()?;
        let Some(entry) = pending.first() else {
            return Ok(false);
        };

        match self.store.load(entry) {
            Ok(req) => {
                if let Err(e) = self.process(&req).await {
                    error!(id = %req.id, error = %e, "upgrade task crashed");
                    let notes = [format!("Supervisor fault: {e:#}")];
                    if let Err(log_err) =
                        self.store.write_status(&req, TaskStatus::Failed, &notes)
                    {
                        warn!(id = %req.id, error = %log_err, "failed to record fault status");
                    }
                }
            }
            Err(e) => {
                // A torn entry cannot be attributed to a request; drop it
                // so the queue does not wedge.
                warn!(entry = %entry.display(), error = %e, "dropping unreadable queue entry");
            }
        }
        self.store.pop(entry)?;
        Ok(true)
    }

    async fn process(&mut self, req: &Request) -> Result<()> {
        if req.scope != Scope::Core {
            self.store.write_status(
                req,
                TaskStatus::Rejected,
                &["Non-core request: routed to the skill pipeline, not this supervisor."
                    .to_string()],
            )?;
            return Ok(());
        }

        let (clean, detail) = sandbox::live_tree_clean(&self.config.repo_root)?;
        if !clean {
            self.store.write_status(
                req,
                TaskStatus::Failed,
                &[format!("Live tree not clean: {detail}")],
            )?;
            return Ok(());
        }

        self.store.write_status(
            req,
            TaskStatus::InProgress,
            &["Creating isolated sandbox.".to_string()],
        )?;

        let sb = sandbox::create(&self.config.repo_root, &self.store, req).await?;
        let result = self.run_in_sandbox(req, &sb).await;
        // Teardown runs whether the task succeeded, failed, or faulted.
        sandbox::remove(&self.config.repo_root, &sb).await;
        result
    }

    async fn run_in_sandbox(&mut self, req: &Request, sb: &Sandbox) -> Result<()> {
        let dev = develop::develop_and_verify(&self.config, req, &sb.dir).await;
        if !dev.passed {
            self.store
                .write_status(req, TaskStatus::Failed, &dev.notes)?;
            return Ok(());
        }

        let outcome = deploy::run(&self.config, &self.store, &mut self.service, req, &sb.dir).await;
        let mut notes = dev.notes;
        notes.extend(outcome.notes);
        let status = if outcome.deployed {
            TaskStatus::Success
        } else {
            TaskStatus::Failed
        };
        self.store.write_status(req, status, &notes)?;
        Ok(())
    }

    /// Snapshot using the live child handle.
    pub fn status(&mut self) -> Result<StatusSnapshot> {
        let pending = self.store.list_pending()?;
        Ok(StatusSnapshot {
            service_running: self.service.is_running(),
            pending_tasks: pending.len(),
            oldest_pending: pending
                .first()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
            service_log: self.store.service_log(),
            tasks_dir: self.store.tasks.clone(),
        })
    }
}

/// Snapshot built from disk alone, for status queries made outside the
/// supervisor process. Service liveness comes from the recorded pid file.
pub fn snapshot_offline(config: &Config) -> Result<StatusSnapshot> {
    let store = TaskStore::open(&config.workspace)?;
    let pending = store.list_pending()?;
    Ok(StatusSnapshot {
        service_running: ServiceController::probe_pid_file(&store.service_pid_file()),
        pending_tasks: pending.len(),
        oldest_pending: pending
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned()),
        service_log: store.service_log(),
        tasks_dir: store.tasks.clone(),
    })
}
