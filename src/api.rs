//! HTTP control API.
//!
//! | Method | Path          | Response                                   |
//! |--------|---------------|--------------------------------------------|
//! | POST   | `/process`    | 201 new job, 200 already active, 400 bad target |
//! | GET    | `/queue`      | `{ taken_at, counts, jobs }`               |
//! | GET    | `/jobs/{id}`  | one job, 404 when unknown or evicted       |
//! | GET    | `/health`     | `{ status, ...HealthSnapshot }`            |

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::error::QueueError;
use crate::health::{HealthMonitor, HealthSnapshot};
use crate::queue::{Job, JobAction, JobQueue, QueueCounts};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub health: Arc<HealthMonitor>,
}

/// Error type for HTTP handlers, rendered as `{ "error": message, "code": CODE }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Job {0} not found")]
    NotFound(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Queue(QueueError::InvalidTarget { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_TARGET", self.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub target: String,
    #[serde(default)]
    pub action: JobAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub job_id: String,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueResponse {
    pub taken_at: DateTime<Utc>,
    pub counts: QueueCounts,
    pub jobs: Vec<Job>,
}

/// Builds the router with request tracing and a per-request timeout.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/process", post(process))
        .route("/queue", get(queue))
        .route("/jobs/{id}", get(job))
        .route("/health", get(health))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn process(
    State(state): State<AppState>,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ProcessResponse>)> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let enqueued = state.queue.enqueue(&request.target, request.action)?;

    let status = if enqueued.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(ProcessResponse {
            job_id: enqueued.job_id,
            created: enqueued.created,
        }),
    ))
}

async fn queue(State(state): State<AppState>) -> Json<QueueResponse> {
    let snapshot = state.queue.snapshot();
    let counts = state.queue.counts();
    Json(QueueResponse {
        taken_at: snapshot.taken_at,
        counts,
        jobs: snapshot.jobs,
    })
}

async fn job(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Job>> {
    state.queue.get(&id).map(Json).ok_or(AppError::NotFound(id))
}

async fn health(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterResult;
    use crate::config::HealthConfig;
    use crate::health::DaemonStats;
    use crate::queue::RetryConfig;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<JobQueue>) {
        let queue = Arc::new(JobQueue::new(RetryConfig::default(), 10));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&queue),
            Arc::new(DaemonStats::new()),
            HealthConfig::default(),
        ));
        let state = AppState {
            queue: Arc::clone(&queue),
            health,
        };
        (router(state, Duration::from_secs(5)), queue)
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn process_creates_then_reports_existing() {
        let (app, _) = app();
        let (status, first) = send(app.clone(), Method::POST, "/process", Some(r#"{"target":"note-A"}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["created"], true);
        assert!(first["job_id"].is_string());

        let (status, second) = send(app, Method::POST, "/process", Some(r#"{"target":"note-A"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["created"], false);
        assert_eq!(second["job_id"], first["job_id"]);
    }

    #[tokio::test]
    async fn process_rejects_malformed_target() {
        let (app, queue) = app();
        let (status, body) = send(app.clone(), Method::POST, "/process", Some(r#"{"target":"/etc/passwd"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_TARGET");

        let (status, body) = send(app, Method::POST, "/process", Some(r#"{"path":"x"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
        assert!(queue.snapshot().jobs.is_empty());
    }

    #[tokio::test]
    async fn queue_lists_jobs_and_counts() {
        let (app, queue) = app();
        queue.enqueue("note-A", JobAction::ExtractQuotes).unwrap();
        queue.enqueue("note-B", JobAction::ExtractQuotes).unwrap();
        let job = queue.claim().unwrap();
        queue
            .complete(&job.id, &AdapterResult::ok(serde_json::Value::Null))
            .unwrap();

        let (status, body) = send(app, Method::GET, "/queue", None).await;
        assert_eq!(status, StatusCode::OK);
        let jobs = body["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["target"], "note-B.md");
        assert_eq!(jobs[0]["state"], "pending");
        assert_eq!(jobs[1]["target"], "note-A.md");
        assert_eq!(jobs[1]["state"], "succeeded");
        assert_eq!(body["counts"]["pending"], 1);
        assert_eq!(body["counts"]["succeeded"], 1);
    }

    #[tokio::test]
    async fn job_lookup_by_id() {
        let (app, queue) = app();
        let id = queue.enqueue("note-A", JobAction::ExtractQuotes).unwrap().job_id;

        let (status, body) = send(app.clone(), Method::GET, &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["attempts"], 0);

        let (status, body) = send(app, Method::GET, "/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn health_reports_status_and_snapshot() {
        let (app, queue) = app();
        queue.enqueue("note-A", JobAction::ExtractQuotes).unwrap();

        let (status, body) = send(app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["queue_depth"], 1);
        assert_eq!(body["active_workers"], 0);
        assert!(body["uptime_secs"].is_u64());
        assert!(body["last_error"].is_null());
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (app, _) = app();
        let (status, _) = send(app, Method::GET, "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
