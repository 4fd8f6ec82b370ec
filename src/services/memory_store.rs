//! In-process stores guarded by a mutex.
//!
//! Each operation holds the lock for its whole transition, which gives the
//! same claim atomicity the Postgres store gets from `SKIP LOCKED`.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::models::account::AccountSnapshot;
use crate::models::job::{Job, JobOutcome, JobStatus, Submission};
use crate::services::store::{AccountStore, JobStore, StoreError, DEFAULT_MAX_ATTEMPTS};

struct Entry {
    job: Job,
    /// Bumped on every write; stands in for `updated_at` ordering since
    /// wall-clock timestamps can tie.
    touched: u64,
}

#[derive(Default)]
struct Jobs {
    entries: HashMap<Uuid, Entry>,
    clock: u64,
}

impl Jobs {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn record_failure(&mut self, job_id: Uuid, error: &str, max_attempts: i32) -> Option<Job> {
        let touched = self.tick();
        let entry = self.entries.get_mut(&job_id)?;
        let job = &mut entry.job;
        job.attempt_count += 1;
        job.status = if job.attempt_count >= max_attempts {
            JobStatus::Failed
        } else {
            JobStatus::Queued
        };
        job.error = Some(error.to_string());
        job.claim_id = None;
        job.claimed_at = None;
        job.updated_at = Utc::now();
        entry.touched = touched;
        Some(job.clone())
    }
}

/// [`JobStore`] kept in memory.
pub struct MemoryJobStore {
    jobs: Mutex<Jobs>,
    max_attempts: i32,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl MemoryJobStore {
    pub fn new(max_attempts: i32) -> Self {
        Self {
            jobs: Mutex::new(Jobs::default()),
            max_attempts,
        }
    }

    /// Backdate a running job's claim, as if its processor had stalled.
    pub fn backdate_claim(&self, job_id: Uuid, by: Duration) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .entries
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        let by = chrono::Duration::from_std(by)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if let Some(claimed_at) = entry.job.claimed_at {
            entry.job.claimed_at = Some(claimed_at - by);
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn submit(&self, subject_key: &str) -> Result<Submission, StoreError> {
        let mut jobs = self.jobs.lock();

        if let Some(entry) = jobs
            .entries
            .values()
            .find(|e| e.job.subject_key == subject_key && e.job.status.is_active())
        {
            return Ok(Submission {
                job: entry.job.clone(),
                coalesced: true,
            });
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            subject_key: subject_key.to_string(),
            status: JobStatus::Queued,
            attempt_count: 0,
            result: None,
            error: None,
            claim_id: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        let touched = jobs.tick();
        jobs.entries.insert(
            job.id,
            Entry {
                job: job.clone(),
                touched,
            },
        );

        Ok(Submission {
            job,
            coalesced: false,
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().entries.get(&job_id).map(|e| e.job.clone()))
    }

    async fn claim_batch(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.jobs.lock();

        let mut queued: Vec<(u64, Uuid)> = jobs
            .entries
            .values()
            .filter(|e| e.job.status == JobStatus::Queued)
            .map(|e| (e.touched, e.job.id))
            .collect();
        queued.sort();
        queued.truncate(limit as usize);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(queued.len());
        for (_, id) in queued {
            let touched = jobs.tick();
            if let Some(entry) = jobs.entries.get_mut(&id) {
                entry.job.status = JobStatus::Running;
                entry.job.claim_id = Some(Uuid::new_v4());
                entry.job.claimed_at = Some(now);
                entry.job.updated_at = now;
                entry.touched = touched;
                claimed.push(entry.job.clone());
            }
        }

        Ok(claimed)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        claim_id: Uuid,
        outcome: JobOutcome,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock();

        let current = &jobs
            .entries
            .get(&job_id)
            .ok_or(StoreError::NotFound(job_id))?
            .job;
        if current.status != JobStatus::Running || current.claim_id != Some(claim_id) {
            return Err(StoreError::rejected(current, claim_id));
        }

        let updated = match outcome {
            JobOutcome::Succeeded(result) => {
                let touched = jobs.tick();
                jobs.entries.get_mut(&job_id).map(|entry| {
                    entry.job.status = JobStatus::Succeeded;
                    entry.job.result = Some(result);
                    entry.job.error = None;
                    entry.job.claim_id = None;
                    entry.job.claimed_at = None;
                    entry.job.updated_at = Utc::now();
                    entry.touched = touched;
                    entry.job.clone()
                })
            }
            JobOutcome::Retry(error) => jobs.record_failure(job_id, &error, self.max_attempts),
        };

        updated.ok_or(StoreError::NotFound(job_id))
    }

    async fn reclaim_stale(&self, lease: Duration) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.jobs.lock();
        let now = Utc::now();

        let mut stale: Vec<(u64, Uuid)> = jobs
            .entries
            .values()
            .filter(|e| e.job.status == JobStatus::Running)
            .filter(|e| {
                e.job
                    .claimed_at
                    .and_then(|at| now.signed_duration_since(at).to_std().ok())
                    .is_some_and(|age| age > lease)
            })
            .map(|e| (e.touched, e.job.id))
            .collect();
        stale.sort();

        Ok(stale
            .into_iter()
            .filter_map(|(_, id)| jobs.record_failure(id, "lease expired", self.max_attempts))
            .collect())
    }

    async fn queue_depth(&self) -> Result<i64, StoreError> {
        let jobs = self.jobs.lock();
        Ok(jobs
            .entries
            .values()
            .filter(|e| e.job.status == JobStatus::Queued)
            .count() as i64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// [`AccountStore`] kept in memory.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<String, AccountSnapshot>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored snapshots ordered by account key.
    pub fn all(&self) -> Vec<AccountSnapshot> {
        let mut accounts: Vec<_> = self.accounts.lock().values().cloned().collect();
        accounts.sort_by(|a, b| a.account_key.cmp(&b.account_key));
        accounts
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn upsert(&self, snapshot: &AccountSnapshot) -> Result<(), StoreError> {
        self.accounts
            .lock()
            .insert(snapshot.account_key.clone(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, account_key: &str) -> Result<Option<AccountSnapshot>, StoreError> {
        Ok(self.accounts.lock().get(account_key).cloned())
    }
}
