//! Evaluation HTTP API.
//!
//! Callers identify themselves with `x-user-id`; an optional `x-api-key`
//! carries their own model key, which is tried before the shared pool.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::application::AppContext;
use crate::domain::errors::DomainError;
use crate::domain::models::{EvaluationResult, Job, JobFailure, Segment, ServerConfig};
use crate::services::NewEvaluation;

pub const USER_HEADER: &str = "x-user-id";
pub const API_KEY_HEADER: &str = "x-api-key";

const CANCEL_REASON: &str = "Cancelled by user";

/// Configuration for the evaluation HTTP server.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for HttpConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            enable_cors: config.enable_cors,
        }
    }
}

/// Request to evaluate one test's recordings.
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub test_id: String,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub user_id: String,
    pub test_id: String,
    pub status: String,
    pub result_id: Option<Uuid>,
    pub error: Option<JobFailure>,
    pub attempts: u32,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let error = job.failure();
        Self {
            id: job.id,
            user_id: job.user_id,
            test_id: job.test_id,
            status: job.status.as_str().to_string(),
            result_id: job.result_id,
            error,
            attempts: job.attempts,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            completed_at: job.completed_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelledResponse {
    pub cancelled: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn domain_error(e: DomainError) -> ApiError {
    let (status, code) = match &e {
        DomainError::JobNotFound(_)
        | DomainError::ResultNotFound(_)
        | DomainError::CredentialNotFound(_)
        | DomainError::ObjectNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        DomainError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        DomainError::ValidationFailed(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        DomainError::StorageError(_)
        | DomainError::DatabaseError(_)
        | DomainError::SerializationError(_) => {
            tracing::error!(error = %e, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    };
    api_error(status, code, e.to_string())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn require_user(headers: &HeaderMap) -> ApiResult<String> {
    header(headers, USER_HEADER).map(str::to_string).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "MISSING_USER",
            format!("{USER_HEADER} header is required"),
        )
    })
}

struct AppState {
    context: AppContext,
}

/// Evaluation HTTP server.
pub struct EvaluationHttpServer {
    config: HttpConfig,
    context: AppContext,
}

impl EvaluationHttpServer {
    pub fn new(context: AppContext, config: HttpConfig) -> Self {
        Self { config, context }
    }

    /// Build the router.
    pub fn build_router(self) -> Router {
        let state = Arc::new(AppState {
            context: self.context,
        });

        let app = Router::new()
            .route("/api/v1/evaluations", post(submit_evaluation))
            .route("/api/v1/jobs/cancel-all", post(cancel_all_jobs))
            .route("/api/v1/jobs/{id}", get(get_job))
            .route("/api/v1/jobs/{id}/cancel", post(cancel_job))
            .route("/api/v1/jobs/{id}/retry", post(retry_job))
            .route("/api/v1/tests/{test_id}/cancel", post(cancel_test_jobs))
            .route("/api/v1/results/{id}", get(get_result))
            .route("/api/v1/health", get(health_check))
            .with_state(state);

        if self.config.enable_cors {
            app.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
                .layer(TraceLayer::new_for_http())
        } else {
            app.layer(TraceLayer::new_for_http())
        }
    }

    /// Start the server with a shutdown signal.
    pub async fn serve_with_shutdown<F>(
        self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let router = self.build_router();

        tracing::info!("Evaluation HTTP server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

// Handler functions

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn submit_evaluation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<EvaluateRequest>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    let user_id = require_user(&headers)?;
    let job = state
        .context
        .jobs
        .submit(NewEvaluation {
            user_id,
            test_id: req.test_id,
            segments: req.segments,
            api_key: header(&headers, API_KEY_HEADER).map(str::to_string),
        })
        .await
        .map_err(domain_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id: job.id,
            status: job.status.as_str().to_string(),
        }),
    ))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let job = state
        .context
        .jobs
        .get(id, header(&headers, USER_HEADER))
        .await
        .map_err(domain_error)?;
    Ok(Json(JobResponse::from(job)))
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let job = state
        .context
        .jobs
        .cancel(id, header(&headers, USER_HEADER), CANCEL_REASON)
        .await
        .map_err(domain_error)?;
    Ok(Json(JobResponse::from(job)))
}

async fn retry_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let job = state
        .context
        .jobs
        .retry(
            id,
            header(&headers, USER_HEADER),
            header(&headers, API_KEY_HEADER).map(str::to_string),
        )
        .await
        .map_err(domain_error)?;
    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}

async fn cancel_test_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(test_id): Path<String>,
) -> ApiResult<Json<CancelledResponse>> {
    let user_id = require_user(&headers)?;
    let cancelled = state
        .context
        .jobs
        .cancel_for_test(&user_id, &test_id, CANCEL_REASON)
        .await
        .map_err(domain_error)?;
    Ok(Json(CancelledResponse { cancelled }))
}

async fn cancel_all_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<CancelledResponse>> {
    let user_id = require_user(&headers)?;
    let cancelled = state
        .context
        .jobs
        .cancel_all(&user_id, CANCEL_REASON)
        .await
        .map_err(domain_error)?;
    Ok(Json(CancelledResponse { cancelled }))
}

async fn get_result(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EvaluationResult>> {
    let result = state
        .context
        .jobs
        .result(id, header(&headers, USER_HEADER))
        .await
        .map_err(domain_error)?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::JobStatus;

    #[test]
    fn test_domain_error_status_mapping() {
        assert_eq!(domain_error(DomainError::JobNotFound(Uuid::nil())).0, StatusCode::NOT_FOUND);
        assert_eq!(
            domain_error(DomainError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Failed
            })
            .0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            domain_error(DomainError::ValidationFailed("x".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            domain_error(DomainError::DatabaseError("boom".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_blank_headers_are_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, "  ".parse().unwrap());
        headers.insert(API_KEY_HEADER, " k ".parse().unwrap());
        assert!(header(&headers, USER_HEADER).is_none());
        assert_eq!(header(&headers, API_KEY_HEADER), Some("k"));
        assert!(require_user(&headers).is_err());
    }
}
