//! Axum route handlers for the PDF job gateway.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::limit::RequestBodyLimitLayer;

use pagecast_common::queue::{JobConfig, Queue};

use crate::dto::{
    ErrorResponse, HealthResponse, JobStatusResponse, SubmitJobRequest, SubmitJobResponse,
    WorkerHealth,
};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<Queue>,
    pub defaults: JobConfig,
    pub pdf_storage_path: PathBuf,
    pub worker_id: String,
}

pub fn add_routes(router: Router, state: AppState, max_body_size: usize) -> Router {
    router
        .route("/healthz", get(health))
        .route(
            "/v1/pdf-jobs",
            post(submit_job).layer(RequestBodyLimitLayer::new(max_body_size)),
        )
        .route("/v1/pdf-jobs/:id", get(get_job))
        .route("/v1/pdf-jobs/:id/file", get(download_file))
        .with_state(state)
}

fn validation_error(detail: impl ToString) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "invalid_request".to_owned(),
            detail: detail.to_string(),
        }),
    )
        .into_response()
}

async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Response {
    let config = match request.resolve(&state.defaults) {
        Ok(config) => config,
        Err(error) => return validation_error(error),
    };

    match state
        .queue
        .submit(&request.url, config, request.metadata)
        .await
    {
        Ok((job, deduplicated)) => (
            StatusCode::ACCEPTED,
            Json(SubmitJobResponse {
                job_id: job.job_id,
                status: job.status.to_string(),
                deduplicated,
            }),
        )
            .into_response(),
        Err(error @ (pagecast_common::error::QueueError::InvalidUrl(_)
        | pagecast_common::error::QueueError::SsrfBlocked(_))) => validation_error(error),
        Err(error) => {
            tracing::error!(%error, "failed to submit job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal_error".to_owned(),
                    detail: "failed to submit job".to_owned(),
                }),
            )
                .into_response()
        }
    }
}

async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.queue.get(&job_id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(JobStatusResponse::from(job))).into_response(),
        Ok(None) => not_found(&job_id),
        Err(error) => {
            tracing::error!(%error, "failed to load job");
            internal_error()
        }
    }
}

async fn download_file(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    let job = match state.queue.get(&job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => return not_found(&job_id),
        Err(error) => {
            tracing::error!(%error, "failed to load job");
            return internal_error();
        }
    };

    if job.status != pagecast_common::queue::JobStatus::Succeeded {
        return validation_error("job has not succeeded");
    }

    let path = state.pdf_storage_path.join(format!("{job_id}.pdf"));
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/pdf")], bytes).into_response(),
        Err(_) => not_found(&job_id),
    }
}

fn not_found(job_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "not_found".to_owned(),
            detail: format!("no job found with id {job_id}"),
        }),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal_error".to_owned(),
            detail: "an unexpected error occurred".to_owned(),
        }),
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    let heartbeat = state.queue.get_heartbeat(&state.worker_id).await;

    let (database, db_ok) = match &heartbeat {
        Ok(_) => ("reachable", true),
        Err(_) => ("unreachable", false),
    };

    let worker = match heartbeat {
        Ok(Some(beat)) => {
            let age_seconds = (Utc::now() - beat.last_heartbeat).num_seconds();
            let status = if age_seconds <= 30 { "healthy" } else { "stale" };
            WorkerHealth {
                status,
                last_heartbeat: Some(beat.last_heartbeat),
                age_seconds: Some(age_seconds),
                state: Some(beat.status),
                current_job: beat.current_job_id,
            }
        }
        Ok(None) => WorkerHealth {
            status: "missing",
            last_heartbeat: None,
            age_seconds: None,
            state: None,
            current_job: None,
        },
        Err(_) => WorkerHealth {
            status: "missing",
            last_heartbeat: None,
            age_seconds: None,
            state: None,
            current_job: None,
        },
    };

    let response = HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        database,
        worker,
    };

    if db_ok {
        (StatusCode::OK, Json(response)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use pagecast_common::render::RenderMode;
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::ServiceExt;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("../common/migrations").run(&pool).await.unwrap();
        let queue = Arc::new(Queue::new_from_pool(pool));
        let tmp = tempfile::tempdir().unwrap();

        let state = AppState {
            queue,
            defaults: JobConfig {
                render_mode: RenderMode::PrintToPdf,
                navigation_timeout_s: 45,
                job_timeout_s: 120,
                max_domain_wait_s: 600,
                max_retries: 2,
            },
            pdf_storage_path: tmp.path().to_path_buf(),
            worker_id: "worker-1".to_owned(),
        };

        (state, tmp)
    }

    #[tokio::test]
    async fn submit_then_fetch_status() {
        let (state, _tmp) = test_state().await;
        let app = add_routes(Router::new(), state, 1_000_000);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/pdf-jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"url":"https://example.com/a"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let job_id = parsed["job_id"].as_str().unwrap().to_owned();

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!("/v1/pdf-jobs/{job_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_job_is_404() {
        let (state, _tmp) = test_state().await;
        let app = add_routes(Router::new(), state, 1_000_000);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/pdf-jobs/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submit_with_invalid_url_is_400() {
        let (state, _tmp) = test_state().await;
        let app = add_routes(Router::new(), state, 1_000_000);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/pdf-jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"url":"not a url"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_with_out_of_range_retries_is_400() {
        let (state, _tmp) = test_state().await;
        let app = add_routes(Router::new(), state, 1_000_000);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/pdf-jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"url":"https://example.com/a","max_retries":99}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_missing_worker() {
        let (state, _tmp) = test_state().await;
        let app = add_routes(Router::new(), state, 1_000_000);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["worker"]["status"], "missing");
    }
}
