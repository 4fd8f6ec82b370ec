use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{Job, JobStatus};

/// Request to queue a shadowban check for one account.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitCheckRequest {
    #[garde(length(min = 1, max = 64))]
    pub subject_key: String,
}

/// Response after submitting a check.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitCheckResponse {
    pub job_id: uuid::Uuid,
    pub status: JobStatus,
    /// True when an already queued or running job for the subject was returned.
    pub coalesced: bool,
}

/// Response for polling a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: uuid::Uuid,
    pub subject_key: String,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            subject_key: job.subject_key,
            status: job.status,
            attempt_count: job.attempt_count,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
