//! The immutable change-request value queued for supervised upgrades.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Classification of a request.
///
/// Only `core` requests are processed by the supervisor; `skill` requests
/// belong to the skill installation pipeline and are rejected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Core,
    Skill,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Core => write!(f, "core"),
            Scope::Skill => write!(f, "skill"),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(Scope::Core),
            "skill" => Ok(Scope::Skill),
            other => Err(format!("unknown scope '{other}' (expected core or skill)")),
        }
    }
}

/// A queued request for a supervised upgrade. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub title: String,
    pub prompt: String,
    pub scope: Scope,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
}

impl Request {
    /// Create a request with a freshly generated id.
    ///
    /// Ids are a local timestamp plus a short random suffix, so sorting
    /// queue entries by name yields creation (FIFO) order.
    pub fn new(title: &str, prompt: &str, scope: Scope, requested_by: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}", Local::now().format("%Y%m%d-%H%M%S"), &suffix[..6]),
            title: title.trim().to_string(),
            prompt: prompt.trim().to_string(),
            scope,
            requested_by: requested_by.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Last six characters of the id, used in sandbox branch names.
    pub fn id_suffix(&self) -> &str {
        &self.id[self.id.len().saturating_sub(6)..]
    }
}
