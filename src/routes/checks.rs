use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::account::{account_key, AccountSnapshot};
use crate::models::check::{JobStatusResponse, SubmitCheckRequest, SubmitCheckResponse};
use crate::models::job::normalize_subject_key;

/// POST /api/v1/checks: Queue a shadowban check for an account.
///
/// A subject with a queued or running job gets that job back (200) instead of
/// a new one (202).
pub async fn submit_check(
    State(state): State<AppState>,
    Json(request): Json<SubmitCheckRequest>,
) -> Result<(StatusCode, Json<SubmitCheckResponse>), StatusCode> {
    request
        .validate()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    let subject_key =
        normalize_subject_key(&request.subject_key).ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;

    let submission = state.jobs.submit(&subject_key).await.map_err(|e| {
        tracing::error!(subject_key = %subject_key, error = %e, "Failed to queue check");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::info!(
        job_id = %submission.job.id,
        subject_key = %subject_key,
        coalesced = submission.coalesced,
        "Check submitted"
    );
    if !submission.coalesced {
        metrics::counter!("shadowban_jobs_submitted_total").increment(1);
    }

    let status_code = if submission.coalesced {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status_code,
        Json(SubmitCheckResponse {
            job_id: submission.job.id,
            status: submission.job.status,
            coalesced: submission.coalesced,
        }),
    ))
}

/// GET /api/v1/checks/{job_id}: Poll a check job.
pub async fn get_check_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job = state.jobs.get(job_id).await.map_err(|e| {
        tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    job.map(|job| Json(job.into())).ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/v1/accounts/{handle}: Latest snapshot for an account.
pub async fn get_account(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Json<AccountSnapshot>, StatusCode> {
    let subject_key = normalize_subject_key(&handle).ok_or(StatusCode::NOT_FOUND)?;
    let key = account_key(&subject_key);

    let account = state.accounts.get(&key).await.map_err(|e| {
        tracing::error!(account_key = %key, error = %e, "Failed to load account");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    account.map(Json).ok_or(StatusCode::NOT_FOUND)
}
