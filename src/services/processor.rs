use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use std::sync::Arc;

use crate::models::job::{Job, JobOutcome, JobStatus};
use crate::services::http_client::{BackoffHttpClient, FetchConfig, FetchError};
use crate::services::result_mapper;
use crate::services::store::{AccountStore, JobStore, StoreError};

/// Where and how to reach the detection API.
#[derive(Debug, Clone)]
pub struct DetectionApi {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl DetectionApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
        }
    }

    /// `<base>/check?subject=<key>`, with the key query-encoded.
    pub fn check_url(&self, subject_key: &str) -> Result<Url, CheckError> {
        let endpoint = format!("{}/check", self.base_url.trim_end_matches('/'));
        Url::parse_with_params(&endpoint, &[("subject", subject_key)])
            .map_err(|e| CheckError::InvalidUrl(e.to_string()))
    }

    fn headers(&self) -> Result<HeaderMap, CheckError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| CheckError::InvalidUrl(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

/// Counters for one [`JobProcessor::run_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl BatchReport {
    pub fn absorb(&mut self, other: BatchReport) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Claims a batch of jobs and runs each check to completion, one at a time.
///
/// Checks run sequentially so the detection API sees at most one request
/// from this process at a time.
pub struct JobProcessor {
    jobs: Arc<dyn JobStore>,
    accounts: Arc<dyn AccountStore>,
    http: BackoffHttpClient,
    api: DetectionApi,
    fetch: FetchConfig,
}

impl JobProcessor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        accounts: Arc<dyn AccountStore>,
        http: BackoffHttpClient,
        api: DetectionApi,
        fetch: FetchConfig,
    ) -> Self {
        Self {
            jobs,
            accounts,
            http,
            api,
            fetch,
        }
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Process up to `batch_size` queued jobs.
    ///
    /// Only a failed claim is an error; per-job failures are recorded on the
    /// job and counted in the report.
    pub async fn run_batch(&self, batch_size: u32) -> Result<BatchReport, ProcessorError> {
        let jobs = self.jobs.claim_batch(batch_size).await?;
        let mut report = BatchReport::default();

        if jobs.is_empty() {
            tracing::trace!("No queued checks to claim");
            return Ok(report);
        }

        tracing::info!(claimed = jobs.len(), "Claimed check batch");

        for job in jobs {
            report.processed += 1;
            if self.process_job(&job).await {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Run one claimed job and record its outcome. Returns true on success.
    async fn process_job(&self, job: &Job) -> bool {
        tracing::info!(
            job_id = %job.id,
            subject_key = %job.subject_key,
            attempt = job.attempt_count + 1,
            "Processing shadowban check"
        );

        let Some(claim_id) = job.claim_id else {
            tracing::error!(job_id = %job.id, "Claimed job has no claim id, skipping");
            return false;
        };

        let outcome = match self.check(job).await {
            Ok(payload) => JobOutcome::Succeeded(payload),
            Err(e) => {
                tracing::warn!(job_id = %job.id, subject_key = %job.subject_key, error = %e, "Check failed");
                JobOutcome::Retry(e.to_string())
            }
        };
        let succeeded = matches!(outcome, JobOutcome::Succeeded(_));

        match self.jobs.complete(job.id, claim_id, outcome).await {
            Ok(done) => {
                let label = match done.status {
                    JobStatus::Succeeded => "succeeded",
                    JobStatus::Failed => "failed",
                    _ => "requeued",
                };
                metrics::counter!("shadowban_checks_total", "outcome" => label).increment(1);

                if done.status == JobStatus::Failed {
                    tracing::warn!(
                        job_id = %done.id,
                        attempt_count = done.attempt_count,
                        "Check failed after max attempts"
                    );
                } else {
                    tracing::info!(
                        job_id = %done.id,
                        status = %done.status,
                        attempt_count = done.attempt_count,
                        "Check completed"
                    );
                }
                succeeded
            }
            Err(e @ StoreError::ClaimLost { .. }) => {
                metrics::counter!("shadowban_checks_total", "outcome" => "claim_lost").increment(1);
                tracing::warn!(job_id = %job.id, error = %e, "Lease expired mid-check, outcome dropped");
                false
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record check outcome");
                false
            }
        }
    }

    /// Fetch, map and store one account. The account is only written after a
    /// successful fetch with a JSON body.
    async fn check(&self, job: &Job) -> Result<serde_json::Value, CheckError> {
        let url = self.api.check_url(&job.subject_key)?;
        let headers = self.api.headers()?;

        let start = std::time::Instant::now();
        let body = self.http.fetch(url.as_str(), &headers, &self.fetch).await;
        metrics::histogram!("shadowban_fetch_seconds").record(start.elapsed().as_secs_f64());
        let body = body?;

        let payload: serde_json::Value = serde_json::from_str(&body)?;
        let snapshot = result_mapper::map_snapshot(&job.subject_key, &payload, Utc::now());

        tracing::debug!(
            job_id = %job.id,
            account_key = %snapshot.account_key,
            status = %snapshot.status,
            followers = snapshot.follower_count,
            "Mapped account snapshot"
        );

        self.accounts.upsert(&snapshot).await?;
        Ok(payload)
    }
}

/// Why a single check failed; the message is stored on the job.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("detection API returned invalid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("invalid detection API request: {0}")]
    InvalidUrl(String),

    #[error("failed to store account: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("failed to claim jobs: {0}")]
    Claim(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_url_encodes_subject() {
        let api = DetectionApi::new("https://detector.example/api/", None);
        let url = api.check_url("a b&c").unwrap();
        assert_eq!(url.as_str(), "https://detector.example/api/check?subject=a+b%26c");
    }

    #[test]
    fn test_bearer_header_only_with_key() {
        let api = DetectionApi::new("http://localhost", None);
        assert!(api.headers().unwrap().is_empty());

        let api = DetectionApi::new("http://localhost", Some("token".into()));
        let headers = api.headers().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer token");
    }

    #[test]
    fn test_report_absorb() {
        let mut total = BatchReport::default();
        total.absorb(BatchReport { processed: 3, succeeded: 2, failed: 1 });
        total.absorb(BatchReport { processed: 1, succeeded: 0, failed: 1 });
        assert_eq!(total, BatchReport { processed: 4, succeeded: 2, failed: 2 });
    }
}
