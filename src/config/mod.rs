use serde::Deserialize;
use std::time::Duration;

use crate::services::http_client::FetchConfig;
use crate::services::scheduler::SchedulerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus listener address for the worker process
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Base URL of the detection API; checks go to `<base>/check?subject=<key>`
    pub detection_api_base_url: String,

    /// Optional bearer token for the detection API
    #[serde(default)]
    pub detection_api_key: Option<String>,

    /// Jobs claimed per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Failed attempts before a job is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Wall-clock ceiling for one scheduler tick
    #[serde(default = "default_tick_budget_secs")]
    pub tick_budget_secs: u64,

    /// Running jobs older than this are handed back to the queue
    #[serde(default = "default_job_lease_secs")]
    pub job_lease_secs: u64,

    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    #[serde(default = "default_fetch_base_delay_ms")]
    pub fetch_base_delay_ms: u64,

    #[serde(default = "default_fetch_max_delay_ms")]
    pub fetch_max_delay_ms: u64,

    #[serde(default = "default_fetch_per_try_timeout_ms")]
    pub fetch_per_try_timeout_ms: u64,

    #[serde(default = "default_fetch_total_deadline_ms")]
    pub fetch_total_deadline_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_batch_size() -> u32 {
    5
}

fn default_max_attempts() -> i32 {
    5
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_tick_budget_secs() -> u64 {
    45
}

fn default_job_lease_secs() -> u64 {
    300
}

fn default_fetch_retries() -> u32 {
    3
}

fn default_fetch_base_delay_ms() -> u64 {
    300
}

fn default_fetch_max_delay_ms() -> u64 {
    10_000
}

fn default_fetch_per_try_timeout_ms() -> u64 {
    10_000
}

fn default_fetch_total_deadline_ms() -> u64 {
    25_000
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error(
        "JOB_LEASE_SECS={lease_secs} must exceed the longest possible tick ({worst_tick_secs}s = \
         TICK_BUDGET_SECS + BATCH_SIZE * FETCH_TOTAL_DEADLINE_MS)"
    )]
    LeaseTooShort { lease_secs: u64, worst_tick_secs: u64 },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject a lease that a live worker can outlast.
    ///
    /// The budget is only checked between batches, so a tick can run for the
    /// whole budget plus one batch where every fetch uses its full deadline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let worst_tick = self.worst_case_tick();
        if Duration::from_secs(self.job_lease_secs) <= worst_tick {
            return Err(ConfigError::LeaseTooShort {
                lease_secs: self.job_lease_secs,
                worst_tick_secs: worst_tick.as_secs(),
            });
        }
        Ok(())
    }

    /// `tick_budget + batch_size * fetch_total_deadline`.
    pub fn worst_case_tick(&self) -> Duration {
        let batch = Duration::from_millis(self.fetch_total_deadline_ms)
            .saturating_mul(self.batch_size);
        Duration::from_secs(self.tick_budget_secs).saturating_add(batch)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            retries: self.fetch_retries,
            base_delay: Duration::from_millis(self.fetch_base_delay_ms),
            max_delay: Duration::from_millis(self.fetch_max_delay_ms),
            per_try_timeout: Duration::from_millis(self.fetch_per_try_timeout_ms),
            total_deadline: Duration::from_millis(self.fetch_total_deadline_ms),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.batch_size,
            interval: Duration::from_secs(self.tick_interval_secs),
            budget: Duration::from_secs(self.tick_budget_secs),
            lease: Duration::from_secs(self.job_lease_secs),
        }
    }
}
