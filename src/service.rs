//! Lifecycle of the supervised service as an operating-system process.
//!
//! The controller owns a single long-lived child. The same start/stop
//! primitives serve both the supervisor's idle keep-alive and the deploy
//! engine's cutover, so restart behavior is identical on both paths.

use crate::config::Config;
use crate::errors::WardenError;
use crate::store::TaskStore;
use anyhow::Result;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Owns and monitors the supervised service process.
pub struct ServiceController {
    command: String,
    repo_root: PathBuf,
    log_path: PathBuf,
    pid_path: PathBuf,
    health_grace: Duration,
    stop_grace: Duration,
    child: Option<Child>,
}

impl ServiceController {
    pub fn new(config: &Config, store: &TaskStore) -> Self {
        Self {
            command: config.service_command.clone(),
            repo_root: config.repo_root.clone(),
            log_path: store.service_log(),
            pid_path: store.service_pid_file(),
            health_grace: config.health_grace,
            stop_grace: config.stop_grace,
            child: None,
        }
    }

    /// Whether the owned child is currently alive.
    pub fn is_running(&mut self) -> bool {
        match self.child {
            Some(ref mut child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Start the service if no live instance exists. Returns liveness.
    pub async fn ensure_alive(&mut self) -> bool {
        if self.is_running() {
            return true;
        }
        self.start().await
    }

    /// Launch a new service instance with output redirected to the service
    /// log, wait the health grace period, and report liveness.
    pub async fn start(&mut self) -> bool {
        match self.spawn() {
            Ok(child) => {
                if let Some(pid) = child.id() {
                    if let Err(e) = std::fs::write(&self.pid_path, pid.to_string()) {
                        debug!(error = %e, "failed to record service pid");
                    }
                    info!(pid, command = %self.command, "service started");
                }
                self.child = Some(child);
            }
            Err(e) => {
                error!(error = %e, command = %self.command, "failed to start service");
                return false;
            }
        }

        tokio::time::sleep(self.health_grace).await;
        let healthy = self.is_running();
        if !healthy {
            error!(
                command = %self.command,
                "service did not survive the health grace period"
            );
        }
        healthy
    }

    fn spawn(&self) -> Result<Child, WardenError> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|source| WardenError::ServiceLog {
                path: self.log_path.clone(),
                source,
            })?;
        let log_err = log.try_clone().map_err(|source| WardenError::ServiceLog {
            path: self.log_path.clone(),
            source,
        })?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);
        // Own process group so stop() can signal the shell and its children
        // together.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(WardenError::ServiceSpawn)
    }

    /// Terminate the current instance: graceful signal first, forceful
    /// kill if it does not exit within the stop grace period.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            let _ = std::fs::remove_file(&self.pid_path);
            return;
        }

        if let Some(pid) = child.id() {
            signal_group_term(pid);
        }
        if timeout(self.stop_grace, child.wait()).await.is_err() {
            warn!(command = %self.command, "graceful stop timed out, killing");
            if let Some(pid) = child.id() {
                signal_group_kill(pid);
            }
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        let _ = std::fs::remove_file(&self.pid_path);
    }

    /// Probe the recorded pid file for liveness, for status queries made
    /// outside the supervisor process.
    pub fn probe_pid_file(pid_path: &Path) -> bool {
        let Ok(raw) = std::fs::read_to_string(pid_path) else {
            return false;
        };
        let Ok(pid) = raw.trim().parse::<i32>() else {
            return false;
        };
        probe_pid(pid)
    }
}

#[cfg(unix)]
fn signal_group_term(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGTERM);
}

#[cfg(unix)]
fn signal_group_kill(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
}

#[cfg(unix)]
fn probe_pid(pid: i32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid), None::<Signal>).is_ok()
}

#[cfg(not(unix))]
fn signal_group_term(_pid: u32) {}

#[cfg(not(unix))]
fn signal_group_kill(_pid: u32) {}

#[cfg(not(unix))]
fn probe_pid(_pid: i32) -> bool {
    false
}
