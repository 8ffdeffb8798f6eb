//! Typed error hierarchy for the warden supervisor.
//!
//! Infrastructure faults get their own variants so callers can match on
//! them; recoverable outcomes (a failed verification attempt, a refused
//! deploy) are ordinary values carried in notes, not errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the supervisor's infrastructure layers.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Failed to spawn service process: {0}")]
    ServiceSpawn(#[source] std::io::Error),

    #[error("Failed to open service log at {path}: {source}")]
    ServiceLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create sandbox worktree: {output}")]
    WorktreeCreate { output: String },

    #[error("Queue entry at {path} is corrupt: {source}")]
    QueueCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
