use tracing_subscriber::EnvFilter;

/// Structured JSON logging, `RUST_LOG` aware, defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Register descriptions for the pipeline metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "shadowban_jobs_submitted_total",
        "New check jobs queued through the API"
    );
    metrics::describe_counter!(
        "shadowban_checks_total",
        "Completed check attempts by outcome (succeeded, requeued, failed, claim_lost)"
    );
    metrics::describe_counter!(
        "shadowban_fetch_retries_total",
        "Detection API calls retried after a transient error"
    );
    metrics::describe_histogram!(
        "shadowban_fetch_seconds",
        "Time spent fetching one check from the detection API, retries included"
    );
    metrics::describe_gauge!(
        "shadowban_queue_depth",
        "Jobs waiting to be claimed"
    );
    metrics::describe_counter!(
        "shadowban_ticks_total",
        "Scheduler ticks by result (completed, skipped, error)"
    );
}
