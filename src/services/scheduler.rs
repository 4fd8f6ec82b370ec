//! Periodic driver for [`JobProcessor`].
//!
//! At most one tick runs at a time: a tick that fires while another is still
//! active returns [`TickOutcome::Skipped`] without touching the queue. Within
//! a tick, batches keep running until the queue is drained or the wall-clock
//! budget is spent; whatever is left stays queued for the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::services::processor::{BatchReport, JobProcessor};

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Jobs claimed per batch.
    pub batch_size: u32,
    pub interval: Duration,
    /// No new batch starts once a tick has run this long.
    pub budget: Duration,
    /// Running jobs older than this are reclaimed at the start of a tick.
    pub lease: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            interval: Duration::from_secs(60),
            budget: Duration::from_secs(45),
            lease: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,
    Completed {
        report: BatchReport,
        batches: u32,
        budget_exhausted: bool,
    },
    /// A batch failed as a whole (claim error); earlier batches still count.
    Failed { report: BatchReport, error: String },
}

/// Clears the running flag when dropped, panics included.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    processor: Arc<JobProcessor>,
    config: SchedulerConfig,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(processor: Arc<JobProcessor>, config: SchedulerConfig) -> Self {
        Self {
            processor,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RunState {
        if self.running.load(Ordering::Acquire) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                running: &self.running,
            })
    }

    /// Run one tick.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = self.try_begin() else {
            tracing::info!("Previous tick still running, skipping");
            metrics::counter!("shadowban_ticks_total", "result" => "skipped").increment(1);
            return TickOutcome::Skipped;
        };

        let started = Instant::now();
        self.reclaim_stale().await;

        let batch_size = self.config.batch_size;
        let mut report = BatchReport::default();
        let mut batches = 0u32;

        let outcome = loop {
            if batches > 0 && started.elapsed() >= self.config.budget {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    batches,
                    "Tick budget exhausted, leaving remaining jobs for next tick"
                );
                break TickOutcome::Completed {
                    report,
                    batches,
                    budget_exhausted: true,
                };
            }

            match self.processor.run_batch(batch_size).await {
                Ok(batch) => {
                    batches += 1;
                    report.absorb(batch);
                    if batch.processed == 0 || batch.processed < batch_size {
                        break TickOutcome::Completed {
                            report,
                            batches,
                            budget_exhausted: false,
                        };
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, batches, "Batch failed, ending tick");
                    break TickOutcome::Failed {
                        report,
                        error: e.to_string(),
                    };
                }
            }
        };

        self.record_queue_depth().await;

        let result = match &outcome {
            TickOutcome::Failed { .. } => "error",
            _ => "completed",
        };
        metrics::counter!("shadowban_ticks_total", "result" => result).increment(1);
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "Tick finished"
        );

        outcome
    }

    /// Fire [`Scheduler::tick`] every interval until `shutdown` is cancelled,
    /// then wait for the tick in flight.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = JoinSet::new();

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            budget_secs = self.config.budget.as_secs(),
            batch_size = self.config.batch_size,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    while let Some(finished) = ticks.try_join_next() {
                        if let Err(e) = finished {
                            tracing::error!(error = %e, "Tick task aborted");
                        }
                    }
                    let scheduler = Arc::clone(&self);
                    ticks.spawn(async move { scheduler.tick().await });
                }
            }
        }

        tracing::info!("Scheduler stopping, waiting for running tick");
        while let Some(finished) = ticks.join_next().await {
            if let Err(e) = finished {
                tracing::error!(error = %e, "Tick task aborted");
            }
        }
    }

    async fn reclaim_stale(&self) {
        match self.processor.job_store().reclaim_stale(self.config.lease).await {
            Ok(reclaimed) => {
                for job in reclaimed {
                    tracing::warn!(
                        job_id = %job.id,
                        subject_key = %job.subject_key,
                        status = %job.status,
                        attempt_count = job.attempt_count,
                        "Reclaimed job with expired lease"
                    );
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to reclaim stale jobs"),
        }
    }

    async fn record_queue_depth(&self) {
        match self.processor.job_store().queue_depth().await {
            Ok(depth) => metrics::gauge!("shadowban_queue_depth").set(depth as f64),
            Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
        }
    }
}
