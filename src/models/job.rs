use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle of a shadowban check job.
///
/// `Queued` is the only state a job can be claimed from; `Succeeded` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Queued and running jobs absorb duplicate submissions for the same subject.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// One pending or attempted account check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub subject_key: String,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Set by each claim; completion must present the current one.
    pub claim_id: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a claimed job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The check went through; the raw API payload is kept on the job.
    Succeeded(serde_json::Value),
    /// The attempt failed. Counts towards `max_attempts`.
    Retry(String),
}

/// Result of a submission: either a fresh job or the active one it was folded into.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    pub coalesced: bool,
}

/// Normalize a user-supplied handle into the key jobs and accounts share.
///
/// Returns `None` when nothing usable is left.
pub fn normalize_subject_key(raw: &str) -> Option<String> {
    let key = raw.trim().trim_start_matches('@').trim().to_lowercase();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        None
    } else {
        Some(key)
    }
}
