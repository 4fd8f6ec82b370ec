//! Test helper utilities: an in-process fake detection API and pipeline wiring.

#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;

use shadowban_monitor::app_state::AppState;
use shadowban_monitor::routes;
use shadowban_monitor::services::http_client::{BackoffHttpClient, FetchConfig};
use shadowban_monitor::services::memory_store::{MemoryAccountStore, MemoryJobStore};
use shadowban_monitor::services::processor::{DetectionApi, JobProcessor};

/// One scripted reply of the fake detection API.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(serde_json::Value),
    Status(u16),
    RateLimited { retry_after_secs: u64 },
    Unavailable { retry_after_secs: Option<u64> },
    Raw(String),
    Slow(Duration, Box<Reply>),
}

#[derive(Default)]
pub struct FakeApiState {
    /// Replies per subject; the last one repeats once the others are used up.
    scripts: Mutex<HashMap<String, Vec<Reply>>>,
    hits: Mutex<Vec<(String, Instant)>>,
}

pub struct FakeApi {
    pub base_url: String,
    state: Arc<FakeApiState>,
}

impl FakeApi {
    pub fn script(&self, subject: &str, replies: Vec<Reply>) {
        self.state.scripts.lock().insert(subject.to_string(), replies);
    }

    /// Arrival times of the requests for `subject`.
    pub fn hits(&self, subject: &str) -> Vec<Instant> {
        self.state
            .hits
            .lock()
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn url_for(&self, subject: &str) -> String {
        format!("{}/check?subject={}", self.base_url, subject)
    }

    pub fn detection_api(&self) -> DetectionApi {
        DetectionApi::new(self.base_url.clone(), None)
    }
}

async fn check(
    State(state): State<Arc<FakeApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let subject = params.get("subject").cloned().unwrap_or_default();
    state.hits.lock().push((subject.clone(), Instant::now()));

    let reply = {
        let mut scripts = state.scripts.lock();
        match scripts.get_mut(&subject) {
            Some(replies) if replies.len() > 1 => Some(replies.remove(0)),
            Some(replies) => replies.first().cloned(),
            None => None,
        }
    };

    match reply {
        Some(reply) => respond(reply).await,
        None => (StatusCode::NOT_FOUND, "no script for subject").into_response(),
    }
}

async fn respond(mut reply: Reply) -> Response {
    while let Reply::Slow(delay, inner) = reply {
        tokio::time::sleep(delay).await;
        reply = *inner;
    }

    match reply {
        Reply::Json(body) => (StatusCode::OK, Json(body)).into_response(),
        Reply::Status(code) => (
            StatusCode::from_u16(code).expect("valid status code"),
            format!("upstream status {code}"),
        )
            .into_response(),
        Reply::RateLimited { retry_after_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            "rate limited",
        )
            .into_response(),
        Reply::Unavailable {
            retry_after_secs: Some(secs),
        } => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, secs.to_string())],
            "unavailable",
        )
            .into_response(),
        Reply::Unavailable {
            retry_after_secs: None,
        } => (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response(),
        Reply::Raw(body) => (StatusCode::OK, body).into_response(),
        Reply::Slow(..) => unreachable!("unwrapped above"),
    }
}

/// Start the fake detection API on an ephemeral local port.
pub async fn spawn_fake_api() -> FakeApi {
    let state = Arc::new(FakeApiState::default());
    let app = Router::new()
        .route("/check", get(check))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake API");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake API server");
    });

    FakeApi {
        base_url: format!("http://{}", addr),
        state,
    }
}

/// Serve the real API routes over the given state on an ephemeral port.
pub async fn spawn_api(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind API");
    let addr = listener.local_addr().expect("local addr");
    let app = routes::api_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("API server");
    });
    format!("http://{}", addr)
}

/// Short delays so retry paths finish quickly.
pub fn fast_fetch_config() -> FetchConfig {
    FetchConfig {
        retries: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        per_try_timeout: Duration::from_secs(2),
        total_deadline: Duration::from_secs(5),
    }
}

pub struct Pipeline {
    pub jobs: Arc<MemoryJobStore>,
    pub accounts: Arc<MemoryAccountStore>,
    pub processor: Arc<JobProcessor>,
}

/// Processor over fresh in-memory stores talking to `api`.
pub fn pipeline(api: &FakeApi, max_attempts: i32, fetch: FetchConfig) -> Pipeline {
    let jobs = Arc::new(MemoryJobStore::new(max_attempts));
    let accounts = Arc::new(MemoryAccountStore::new());
    let processor = Arc::new(JobProcessor::new(
        jobs.clone(),
        accounts.clone(),
        BackoffHttpClient::new().expect("HTTP client"),
        api.detection_api(),
        fetch,
    ));

    Pipeline {
        jobs,
        accounts,
        processor,
    }
}

pub fn user_payload(screen_name: &str, followers: i64) -> serde_json::Value {
    serde_json::json!({
        "user": {"legacy": {"screen_name": screen_name, "followers_count": followers}}
    })
}
