use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::alert::{AlertChannelConfig, AlertDispatcher, TestSendResult};
use crate::config::Config;
use crate::error::PipelineError;
use crate::pipeline::{Orchestrator, RunReport, RunState};
use crate::store::{AlertRecord, PipelineStore, StoredAnalysis};
use crate::types::{AnalyzeRequest, HealthState, SourceHealth};
use crate::validate::{validate, ValidateRequest, ValidateResponse};

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<Orchestrator>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    fn store(&self) -> &dyn PipelineStore {
        self.orchestrator.store().as_ref()
    }
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(_) | PipelineError::Diff(_) => Self::bad_request(err.to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    scheduled_sources: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceHealthResponse {
    #[serde(flatten)]
    health: SourceHealth,
    run_state: RunState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectHealthResponse {
    project_id: String,
    state: HealthState,
    sources: Vec<SourceHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestChannelRequest {
    #[serde(default = "default_test_project")]
    project_id: String,
    #[serde(flatten)]
    channel: AlertChannelConfig,
}

pub async fn build_orchestrator(
    config: &Config,
    store: Arc<dyn PipelineStore>,
) -> Result<Arc<Orchestrator>> {
    for entry in &config.alerts.channels {
        store
            .save_channel(&entry.project_id, &entry.channel)
            .await
            .with_context(|| format!("failed seeding channel for {}", entry.project_id))?;
    }
    let dispatcher = AlertDispatcher::new(config.channel_context()?);
    Ok(Arc::new(Orchestrator::new(store, dispatcher)))
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/validate", post(validate_schema))
        .route("/api/analyze", post(analyze))
        .route("/api/analyze/batch", post(analyze_batch))
        .route("/api/sources/:id/health", get(source_health))
        .route("/api/sources/:id/analyses", get(source_analyses))
        .route("/api/projects/:id/health", get(project_health))
        .route("/api/projects/:id/alerts", get(project_alerts))
        .route("/api/channels/test", post(test_channel))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(
    config: Config,
    store: Arc<dyn PipelineStore>,
    bind: SocketAddr,
) -> Result<()> {
    let orchestrator = build_orchestrator(&config, store).await?;
    if config.schedule.enabled {
        let (sources, provider) = config.scheduled_sources();
        let provider = Arc::new(provider);
        for source in sources {
            orchestrator.schedule(source, provider.clone());
        }
    }
    let app = router(ApiState::new(orchestrator.clone()));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("REST API listening on http://{bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    orchestrator.timers().cancel_all();
    info!("server stopped, timers cancelled");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn health(State(state): State<ApiState>) -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        scheduled_sources: state.orchestrator.timers().active_count(),
    })
}

async fn validate_schema(
    State(state): State<ApiState>,
    body: std::result::Result<Json<ValidateRequest>, JsonRejection>,
) -> std::result::Result<Json<ValidateResponse>, ApiError> {
    let Json(request) = body?;
    let response = validate(state.store(), &request).await?;
    Ok(Json(response))
}

async fn analyze(
    State(state): State<ApiState>,
    body: std::result::Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<RunReport> {
    let Json(request) = body?;
    Ok(ok(state.orchestrator.handle(&request).await))
}

async fn analyze_batch(
    State(state): State<ApiState>,
    body: std::result::Result<Json<Vec<AnalyzeRequest>>, JsonRejection>,
) -> ApiResult<Vec<RunReport>> {
    let Json(requests) = body?;
    Ok(ok(state.orchestrator.handle_batch(&requests).await))
}

async fn source_health(
    State(state): State<ApiState>,
    Path(source_id): Path<String>,
) -> ApiResult<SourceHealthResponse> {
    let health = state
        .store()
        .source_health(&source_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("unknown source {source_id}")))?;
    Ok(ok(SourceHealthResponse {
        health,
        run_state: state.orchestrator.state(&source_id),
    }))
}

async fn source_analyses(
    State(state): State<ApiState>,
    Path(source_id): Path<String>,
) -> ApiResult<Vec<StoredAnalysis>> {
    let analyses = state
        .store()
        .analyses_for_source(&source_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(ok(analyses))
}

async fn project_health(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
) -> ApiResult<ProjectHealthResponse> {
    let store = state.store();
    let project_state = store
        .project_health(&project_id)
        .await
        .map_err(ApiError::internal)?;
    let sources = store
        .project_sources(&project_id)
        .await
        .map_err(ApiError::internal)?;
    let Some(project_state) = project_state.or_else(|| (!sources.is_empty()).then_some(HealthState::Healthy)) else {
        return Err(ApiError::not_found(format!("unknown project {project_id}")));
    };
    Ok(ok(ProjectHealthResponse {
        project_id,
        state: project_state,
        sources,
    }))
}

async fn project_alerts(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
) -> ApiResult<Vec<AlertRecord>> {
    let history = state
        .store()
        .alert_history(&project_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(ok(history))
}

async fn test_channel(
    State(state): State<ApiState>,
    body: std::result::Result<Json<TestChannelRequest>, JsonRejection>,
) -> std::result::Result<Json<TestSendResult>, ApiError> {
    let Json(request) = body?;
    let result = state
        .orchestrator
        .dispatcher()
        .test_send(&request.project_id, &request.channel)
        .await;
    Ok(Json(result))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

fn default_test_project() -> String {
    "test".to_string()
}
