use std::fmt;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Namespace for deterministic job ids (uuid v5 over `"<action>:<target>"`).
const JOB_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b7_4d0a_8e25_7c1f_0b9d_3a61);

/// Lifecycle state of a job.
///
/// `pending → running → {succeeded | retrying → pending | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// The logical action a job performs on its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    #[default]
    ExtractQuotes,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::ExtractQuotes => f.write_str("extract_quotes"),
        }
    }
}

/// A note reference relative to the watch root, e.g. `note-A` or `inbox/talk.md`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Validates a raw target string and reduces it to its canonical form:
    /// `/`-separated normal components, always ending in `.md`. Every
    /// spelling of the same note (`note-A`, `./note-A.md`, `note-A.md`) parses
    /// to the same target and therefore the same job id.
    pub fn parse(raw: &str) -> Result<Self, QueueError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(QueueError::invalid_target(raw, "target must not be empty"));
        }
        if trimmed.contains('\0') {
            return Err(QueueError::invalid_target(raw, "target contains a NUL byte"));
        }

        let normalized = trimmed.replace('\\', "/");
        let path = Path::new(&normalized);
        if path.is_absolute() || normalized.starts_with('/') {
            return Err(QueueError::invalid_target(
                raw,
                "target must be relative to the watch root",
            ));
        }

        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        QueueError::invalid_target(raw, "target is not valid UTF-8")
                    })?;
                    if part.starts_with('.') {
                        return Err(QueueError::invalid_target(raw, "hidden paths are not notes"));
                    }
                    parts.push(part);
                }
                _ => {
                    return Err(QueueError::invalid_target(
                        raw,
                        "path escapes the watch root",
                    ));
                }
            }
        }
        if parts.is_empty() {
            return Err(QueueError::invalid_target(raw, "target names no note"));
        }

        let mut canonical = parts.join("/");
        match Path::new(&canonical).extension().and_then(|e| e.to_str()) {
            Some("md") => {}
            None => canonical.push_str(".md"),
            Some(other) => {
                return Err(QueueError::invalid_target(
                    raw,
                    format!("unsupported resource kind .{other}"),
                ));
            }
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the deterministic id for `(target, action)`.
pub fn job_id_for(target: &Target, action: JobAction) -> String {
    let name = format!("{action}:{target}");
    Uuid::new_v5(&JOB_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// A unit of enrichment work for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub target: Target,
    pub action: JobAction,
    pub state: JobState,
    /// Number of dispatches so far. Counted when the job is claimed and never
    /// changed by completion, so a first-try success ends at 1 and a job that
    /// exhausted its budget ends at `max_attempts`.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// When a `retrying` job becomes claimable again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Set when the adapter reported a partial enrichment.
    #[serde(default)]
    pub partial: bool,
}

impl Job {
    pub fn new(target: Target, action: JobAction) -> Self {
        let now = Utc::now();
        Self {
            id: job_id_for(&target, action),
            target,
            action,
            state: JobState::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
            next_attempt_at: None,
            partial: false,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
