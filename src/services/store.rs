//! Storage seams for the check pipeline.
//!
//! [`JobStore`] owns the queued → running → terminal transitions and
//! [`AccountStore`] the per-account snapshots. The Postgres adapters here back
//! the binaries; `memory_store` offers the same contracts in process.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{account_queries, queries};
use crate::models::account::AccountSnapshot;
use crate::models::job::{Job, JobOutcome, JobStatus, Submission};

/// Failed attempts after which a job stops being retried.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Queue a check for `subject_key`, or return its queued/running job.
    async fn submit(&self, subject_key: &str) -> Result<Submission, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Atomically move up to `limit` queued jobs to running and return them.
    /// Concurrent callers never receive the same job.
    async fn claim_batch(&self, limit: u32) -> Result<Vec<Job>, StoreError>;

    /// Finish a job running under `claim_id`, the token handed out by
    /// [`JobStore::claim_batch`]. A job that is no longer running fails with
    /// [`StoreError::NotRunning`]; one that was reclaimed and claimed again
    /// fails with [`StoreError::ClaimLost`].
    async fn complete(
        &self,
        job_id: Uuid,
        claim_id: Uuid,
        outcome: JobOutcome,
    ) -> Result<Job, StoreError>;

    /// Treat running jobs claimed more than `lease` ago as failed attempts.
    async fn reclaim_stale(&self, lease: Duration) -> Result<Vec<Job>, StoreError>;

    async fn queue_depth(&self) -> Result<i64, StoreError>;

    /// Connectivity check for health probes.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert-or-replace keyed by `snapshot.account_key`.
    async fn upsert(&self, snapshot: &AccountSnapshot) -> Result<(), StoreError>;

    async fn get(&self, account_key: &str) -> Result<Option<AccountSnapshot>, StoreError>;
}

/// Postgres-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    max_attempts: i32,
}

impl PgJobStore {
    pub fn new(pool: PgPool, max_attempts: i32) -> Self {
        Self { pool, max_attempts }
    }

    /// Explain why a guarded completion touched no row.
    async fn rejected_completion(&self, job_id: Uuid, claim_id: Uuid) -> StoreError {
        match queries::get_job(&self.pool, job_id).await {
            Ok(Some(job)) => StoreError::rejected(&job, claim_id),
            Ok(None) => StoreError::NotFound(job_id),
            Err(e) => StoreError::Database(e),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn submit(&self, subject_key: &str) -> Result<Submission, StoreError> {
        let (job, coalesced) = queries::submit_job(&self.pool, subject_key).await?;
        Ok(Submission { job, coalesced })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(queries::get_job(&self.pool, job_id).await?)
    }

    async fn claim_batch(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(queries::claim_jobs(&self.pool, i64::from(limit)).await?)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        claim_id: Uuid,
        outcome: JobOutcome,
    ) -> Result<Job, StoreError> {
        let updated = match &outcome {
            JobOutcome::Succeeded(result) => {
                queries::complete_job_success(&self.pool, job_id, claim_id, result).await?
            }
            JobOutcome::Retry(error) => {
                queries::complete_job_retry(&self.pool, job_id, claim_id, error, self.max_attempts)
                    .await?
            }
        };

        match updated {
            Some(job) => Ok(job),
            None => Err(self.rejected_completion(job_id, claim_id).await),
        }
    }

    async fn reclaim_stale(&self, lease: Duration) -> Result<Vec<Job>, StoreError> {
        Ok(queries::reclaim_stale_jobs(&self.pool, lease, self.max_attempts).await?)
    }

    async fn queue_depth(&self) -> Result<i64, StoreError> {
        Ok(queries::count_queued_jobs(&self.pool).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Postgres-backed [`AccountStore`].
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn upsert(&self, snapshot: &AccountSnapshot) -> Result<(), StoreError> {
        Ok(account_queries::upsert_account(&self.pool, snapshot).await?)
    }

    async fn get(&self, account_key: &str) -> Result<Option<AccountSnapshot>, StoreError> {
        Ok(account_queries::get_account(&self.pool, account_key).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} is {status}, not running")]
    NotRunning { id: Uuid, status: JobStatus },

    #[error("Job {id} was reclaimed; claim {claim_id} is no longer current")]
    ClaimLost { id: Uuid, claim_id: Uuid },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Why `job` refuses a completion presented with `claim_id`.
    pub(crate) fn rejected(job: &Job, claim_id: Uuid) -> Self {
        if job.status == JobStatus::Running {
            StoreError::ClaimLost {
                id: job.id,
                claim_id,
            }
        } else {
            StoreError::NotRunning {
                id: job.id,
                status: job.status,
            }
        }
    }
}
