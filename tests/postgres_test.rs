//! Postgres stores against a real database.
//!
//! These tests require a dedicated PostgreSQL database (tables are truncated)
//! configured via DATABASE_URL.
//!
//! Run with: cargo test --test postgres_test -- --ignored --test-threads=1

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use shadowban_monitor::db;
use shadowban_monitor::models::account::{AccountSnapshot, AccountStatus, BanFlags};
use shadowban_monitor::models::job::{JobOutcome, JobStatus};
use shadowban_monitor::services::store::{
    AccountStore, JobStore, PgAccountStore, PgJobStore, StoreError,
};

async fn fresh_pool() -> sqlx::PgPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&url).await.expect("Failed to connect to database");
    db::run_migrations(&pool).await.expect("Failed to run migrations");
    sqlx::query("TRUNCATE check_jobs, accounts")
        .execute(&pool)
        .await
        .expect("Failed to truncate tables");
    pool
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_job_lifecycle() {
    let pool = fresh_pool().await;
    let store = PgJobStore::new(pool.clone(), 3);

    // Submission coalesces onto the active job
    let first = store.submit("alice").await.expect("submit");
    assert!(!first.coalesced);
    assert_eq!(first.job.status, JobStatus::Queued);
    assert_eq!(first.job.attempt_count, 0);
    let again = store.submit("alice").await.expect("resubmit");
    assert!(again.coalesced);
    assert_eq!(again.job.id, first.job.id);

    // Completing a queued job is refused
    let err = store
        .complete(first.job.id, Uuid::new_v4(), JobOutcome::Succeeded(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotRunning { status: JobStatus::Queued, .. }));

    // Failed attempts requeue until max_attempts, then fail
    for attempt in 1..=3 {
        let claimed = store.claim_batch(10).await.expect("claim");
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, JobStatus::Running);
        assert!(claimed[0].claimed_at.is_some());
        let claim = claimed[0].claim_id.expect("claim id");

        let job = store
            .complete(first.job.id, claim, JobOutcome::Retry(format!("HTTP 500 #{attempt}")))
            .await
            .expect("complete");
        assert_eq!(job.attempt_count, attempt);
        let expected = if attempt < 3 { JobStatus::Queued } else { JobStatus::Failed };
        assert_eq!(job.status, expected);
    }
    assert!(store.claim_batch(10).await.unwrap().is_empty());

    // A terminal job no longer absorbs submissions
    let fresh = store.submit("alice").await.unwrap();
    assert!(!fresh.coalesced);
    let claim = store.claim_batch(1).await.unwrap()[0].claim_id.unwrap();
    let done = store
        .complete(fresh.job.id, claim, JobOutcome::Succeeded(json!({"user": {}})))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.result, Some(json!({"user": {}})));
    assert_eq!(done.error, None);
    assert_eq!(done.claim_id, None);

    let polled = store.get(fresh.job.id).await.unwrap().expect("job exists");
    assert_eq!(polled.status, JobStatus::Succeeded);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_concurrent_claims_are_disjoint() {
    let pool = fresh_pool().await;
    let store = PgJobStore::new(pool.clone(), 5);
    for i in 0..40 {
        store.submit(&format!("user{i}")).await.unwrap();
    }

    let (a, b, c) = futures::join!(
        store.claim_batch(15),
        store.claim_batch(15),
        store.claim_batch(15)
    );

    let mut seen = HashSet::new();
    for job in a.unwrap().into_iter().chain(b.unwrap()).chain(c.unwrap()) {
        assert!(seen.insert(job.id), "job {} claimed twice", job.id);
    }
    assert_eq!(seen.len(), 40);
    assert_eq!(store.queue_depth().await.unwrap(), 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_reclaim_expired_lease() {
    let pool = fresh_pool().await;
    let store = PgJobStore::new(pool.clone(), 5);
    let job = store.submit("stalled").await.unwrap().job;
    store.claim_batch(1).await.unwrap();

    assert!(store.reclaim_stale(Duration::from_secs(300)).await.unwrap().is_empty());

    sqlx::query("UPDATE check_jobs SET claimed_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();

    let reclaimed = store.reclaim_stale(Duration::from_secs(300)).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].status, JobStatus::Queued);
    assert_eq!(reclaimed[0].attempt_count, 1);
    assert_eq!(reclaimed[0].error.as_deref(), Some("lease expired"));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_stale_owner_cannot_complete_reclaimed_job() {
    let pool = fresh_pool().await;
    let store = PgJobStore::new(pool.clone(), 5);
    let job = store.submit("alice").await.unwrap().job;
    let stale = store.claim_batch(1).await.unwrap()[0].claim_id.unwrap();

    sqlx::query("UPDATE check_jobs SET claimed_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();
    store.reclaim_stale(Duration::from_secs(300)).await.unwrap();
    let current = store.claim_batch(1).await.unwrap()[0].claim_id.unwrap();
    assert_ne!(stale, current);

    let err = store
        .complete(job.id, stale, JobOutcome::Retry("HTTP 500".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ClaimLost { id, .. } if id == job.id));

    let polled = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(polled.status, JobStatus::Running);
    assert_eq!(polled.attempt_count, 1);
    assert_eq!(polled.claim_id, Some(current));

    let done = store
        .complete(job.id, current, JobOutcome::Succeeded(json!({})))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.attempt_count, 1);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_account_upsert_is_idempotent() {
    let pool = fresh_pool().await;
    let store = PgAccountStore::new(pool.clone());

    let snapshot = AccountSnapshot {
        account_key: "@alice".into(),
        handle: "alice".into(),
        display_name: "Alice".into(),
        status: AccountStatus::GhostBan,
        flags: BanFlags {
            ghost_ban: true,
            ..Default::default()
        },
        follower_count: 10,
        following_count: 5,
        media_count: 1,
        favourite_count: 2,
        post_count: 3,
        // Whole seconds so the TIMESTAMPTZ round trip is exact
        updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
    };

    store.upsert(&snapshot).await.unwrap();
    let once = store.get("@alice").await.unwrap().expect("stored");
    store.upsert(&snapshot).await.unwrap();
    let twice = store.get("@alice").await.unwrap().expect("stored");
    assert_eq!(once, twice);
    assert_eq!(twice, snapshot);

    let refreshed = AccountSnapshot {
        status: AccountStatus::Active,
        flags: BanFlags::default(),
        follower_count: 11,
        ..snapshot.clone()
    };
    store.upsert(&refreshed).await.unwrap();
    assert_eq!(store.get("@alice").await.unwrap().unwrap(), refreshed);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
