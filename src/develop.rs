//! The develop-verify loop: repeated generation attempts under a wall-clock
//! deadline, each followed by the verification pipeline.
//!
//! Generation failures never abort an attempt; verification always runs
//! against whatever the generation step left in the sandbox, and its tail
//! becomes the feedback block for the next attempt.

use crate::config::Config;
use crate::exec;
use crate::request::Request;
use crate::verify;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const GENERATE_MIN: Duration = Duration::from_secs(60);
const GENERATE_MAX: Duration = Duration::from_secs(900);
const FEEDBACK_LINES: usize = 8;

/// Outcome of the loop: a verdict plus the accumulated note log.
#[derive(Debug)]
pub struct DevelopOutcome {
    pub passed: bool,
    pub notes: Vec<String>,
}

/// Drive generation and verification in `sandbox_dir` until verification
/// passes or the configured deadline is exhausted.
pub async fn develop_and_verify(
    config: &Config,
    req: &Request,
    sandbox_dir: &Path,
) -> DevelopOutcome {
    let deadline = Instant::now() + config.build_deadline;
    let mut notes = Vec::new();
    let mut feedback = String::new();
    let mut attempt = 0u32;

    while Instant::now() < deadline {
        attempt += 1;
        notes.push(format!("Attempt {attempt}: coding in sandbox."));

        let prompt = compose_prompt(&req.prompt, &feedback);
        let remaining = deadline.saturating_duration_since(Instant::now());
        let limit = remaining.clamp(GENERATE_MIN, GENERATE_MAX);

        let (generated, detail) = run_generation(config, &prompt, sandbox_dir, limit).await;
        if generated {
            notes.push("Generation step finished.".to_string());
        } else {
            notes.push(format!(
                "Generation step issue: {}",
                exec::trim_output(&detail, 300)
            ));
        }

        let report = verify::run_pipeline(&config.checks, sandbox_dir).await;
        notes.extend(report.notes.iter().cloned());
        if report.passed {
            info!(id = %req.id, attempt, "verification passed");
            notes.push("Verification passed.".to_string());
            return DevelopOutcome {
                passed: true,
                notes,
            };
        }

        debug!(id = %req.id, attempt, "verification failed, retrying with feedback");
        feedback = feedback_tail(&report.notes);
    }

    notes.push(format!(
        "Deadline of {}s exceeded before successful verification.",
        config.build_deadline.as_secs()
    ));
    DevelopOutcome {
        passed: false,
        notes,
    }
}

/// Compose the generation prompt: fixed preamble, the task instructions,
/// and the previous attempt's feedback block.
fn compose_prompt(task: &str, feedback: &str) -> String {
    format!(
        "You are upgrading the supervised service core. \
         Rules: make minimal safe changes, keep the service stable, and run quick self-checks. \
         Task:\n{task}\n\n\
         If a previous attempt failed, fix based on this feedback:\n{}",
        if feedback.is_empty() {
            "(none)"
        } else {
            feedback
        }
    )
}

/// The last few verification notes, joined into the next attempt's
/// feedback block. Bounded to keep feedback compact and recent.
fn feedback_tail(notes: &[String]) -> String {
    let start = notes.len().saturating_sub(FEEDBACK_LINES);
    notes[start..].join("\n")
}

/// Invoke the external generation tool with the prompt as its final
/// argument. Absence or failure is advisory only.
async fn run_generation(
    config: &Config,
    prompt: &str,
    cwd: &Path,
    limit: Duration,
) -> (bool, String) {
    if !exec::available(&config.generate_program) {
        return (
            false,
            format!("'{}' is not installed", config.generate_program),
        );
    }
    let mut args = config.generate_args.clone();
    args.push(prompt.to_string());
    let result = exec::run_cmd(&config.generate_program, &args, cwd, limit).await;
    (result.ok, result.combined())
}
