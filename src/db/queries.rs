use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};

const JOB_COLUMNS: &str =
    "id, subject_key, status, attempt_count, result, error, claim_id, claimed_at, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Job {
        id: row.try_get("id")?,
        subject_key: row.try_get("subject_key")?,
        status,
        attempt_count: row.try_get("attempt_count")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        claim_id: row.try_get("claim_id")?,
        claimed_at: row.try_get("claimed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a queued job unless the subject already has an active one.
///
/// Returns the job and whether it was an existing one. The partial unique index
/// on active subjects makes the check-then-insert race free.
pub async fn submit_job(pool: &PgPool, subject_key: &str) -> Result<(Job, bool), sqlx::Error> {
    // Two rounds cover an active job finishing between the insert and the lookup.
    for _ in 0..2 {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO check_jobs (subject_key)
            VALUES ($1)
            ON CONFLICT (subject_key) WHERE status IN ('queued', 'running') DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(subject_key)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((job_from_row(&row)?, false));
        }

        let existing = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM check_jobs
            WHERE subject_key = $1 AND status IN ('queued', 'running')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(subject_key)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = existing {
            return Ok((job_from_row(&row)?, true));
        }
    }

    Err(sqlx::Error::RowNotFound)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM check_jobs WHERE id = $1"))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Flip up to `limit` queued jobs to running in one statement.
///
/// `SKIP LOCKED` keeps concurrent claimers off each other's rows. Oldest
/// `updated_at` goes first, so requeued jobs queue behind untouched ones.
/// Every claimed row gets a fresh `claim_id`.
pub async fn claim_jobs(pool: &PgPool, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        WITH next AS (
            SELECT id
            FROM check_jobs
            WHERE status = 'queued'
            ORDER BY updated_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE check_jobs AS j
        SET status = 'running',
            claim_id = gen_random_uuid(),
            claimed_at = NOW(),
            updated_at = NOW()
        FROM next
        WHERE j.id = next.id
        RETURNING {}
        "#,
        qualified_columns("j")
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(jobs)
}

/// Mark a running job succeeded. `None` when the job is not running under `claim_id`.
pub async fn complete_job_success(
    pool: &PgPool,
    job_id: Uuid,
    claim_id: Uuid,
    result: &serde_json::Value,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE check_jobs
        SET status = 'succeeded',
            result = $3,
            error = NULL,
            claim_id = NULL,
            claimed_at = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status = 'running' AND claim_id = $2
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(claim_id)
    .bind(result)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Record a failed attempt on a running job: requeue it, or fail it once
/// `max_attempts` is reached. `None` when the job is not running under `claim_id`.
pub async fn complete_job_retry(
    pool: &PgPool,
    job_id: Uuid,
    claim_id: Uuid,
    error: &str,
    max_attempts: i32,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE check_jobs
        SET attempt_count = attempt_count + 1,
            status = CASE WHEN attempt_count + 1 >= $4 THEN 'failed' ELSE 'queued' END,
            error = $3,
            claim_id = NULL,
            claimed_at = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status = 'running' AND claim_id = $2
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(claim_id)
    .bind(error)
    .bind(max_attempts)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Count an expired lease as a failed attempt for every job running longer than `lease`.
pub async fn reclaim_stale_jobs(
    pool: &PgPool,
    lease: Duration,
    max_attempts: i32,
) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        UPDATE check_jobs
        SET attempt_count = attempt_count + 1,
            status = CASE WHEN attempt_count + 1 >= $2 THEN 'failed' ELSE 'queued' END,
            error = 'lease expired',
            claim_id = NULL,
            claimed_at = NULL,
            updated_at = NOW()
        WHERE status = 'running'
          AND claimed_at < NOW() - make_interval(secs => $1)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(lease.as_secs_f64())
    .bind(max_attempts)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Number of jobs waiting to be claimed
pub async fn count_queued_jobs(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS depth FROM check_jobs WHERE status = 'queued'")
        .fetch_one(pool)
        .await?;

    row.try_get("depth")
}

fn qualified_columns(alias: &str) -> String {
    JOB_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}
