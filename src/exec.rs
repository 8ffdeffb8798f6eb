//! Bounded invocation of external commands.
//!
//! Every external tool the supervisor touches (git, the generation step,
//! verification checks) goes through [`run_cmd`]: explicit timeout, captured
//! stdout/stderr, and failure-as-value semantics. A timeout or a spawn
//! failure is a failed result, never a hang and never a panic.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Outcome of one external command invocation.
#[derive(Debug)]
pub struct ExecResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    fn failed(message: String) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: message,
        }
    }

    /// Stdout with stderr appended, for notes and feedback blocks.
    pub fn combined(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\nSTDERR:\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run `program` with `args` in `cwd`, bounded by `limit`.
///
/// The child is killed if the timeout fires or the future is dropped.
pub async fn run_cmd<I, S>(program: &str, args: I, cwd: &Path, limit: Duration) -> ExecResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => return ExecResult::failed(format!("Command failed to start ({program}): {e}")),
    };

    match timeout(limit, child.wait_with_output()).await {
        Err(_) => ExecResult::failed(format!("Timeout after {}s: {program}", limit.as_secs())),
        Ok(Err(e)) => ExecResult::failed(format!("Failed to wait for {program}: {e}")),
        Ok(Ok(output)) => ExecResult {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
    }
}

/// Check whether `program` resolves to an executable, either as a path or
/// on `PATH`. Used to skip absent tools instead of failing on them.
pub fn available(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate);
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(program))))
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Truncate `text` to at most `limit` characters, noting how much was cut.
pub fn trim_output(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}\n... (truncated {} chars)", total - limit)
}
