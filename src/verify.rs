//! The verification pipeline: ordered external checks with tolerant
//! availability.
//!
//! A check whose executable is absent is skipped, not failed. The pipeline
//! short-circuits on the first failing check. If nothing at all could run,
//! the pipeline fails closed: an unverifiable change must never deploy.

use crate::config::CheckConfig;
use crate::exec;
use std::path::Path;
use std::time::Duration;

const CHECK_TIMEOUT: Duration = Duration::from_secs(600);
const OUTPUT_LIMIT: usize = 1200;

/// Result of running the pipeline once.
#[derive(Debug)]
pub struct VerifyReport {
    pub passed: bool,
    pub notes: Vec<String>,
}

/// Run the configured checks in order inside `cwd`.
pub async fn run_pipeline(checks: &[CheckConfig], cwd: &Path) -> VerifyReport {
    let mut notes = Vec::new();
    let mut executed = 0;

    for check in checks {
        let Some(program) = check.command.first() else {
            notes.push(format!("Skipped {}: empty command.", check.name));
            continue;
        };
        if !exec::available(program) {
            notes.push(format!("Skipped {}: '{program}' not found.", check.name));
            continue;
        }
        executed += 1;
        let result = exec::run_cmd(program, &check.command[1..], cwd, CHECK_TIMEOUT).await;
        if !result.ok {
            notes.push(format!("{} failed.", check.name));
            notes.push(exec::trim_output(&result.combined(), OUTPUT_LIMIT));
            return VerifyReport {
                passed: false,
                notes,
            };
        }
        notes.push(format!("{} passed.", check.name));
    }

    if executed == 0 {
        notes.push("No verification tools available.".to_string());
        return VerifyReport {
            passed: false,
            notes,
        };
    }

    VerifyReport {
        passed: true,
        notes,
    }
}
