use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

use crate::analytics::answer::days_from_range_label;
use crate::analytics::{
    do_not_track, resolve_client_address, AggregationEngine, Answer, AnswerGenerator,
    AnswerService, EventIngestor, GeoResolver, IngestError, IngestOutcome, ReportExporter,
    RollupResult,
};
use crate::auth::TenantClaims;
use crate::config::AnalyticsConfig;
use crate::models::{NewEvent, Project};
use crate::storage::{ProjectKey, Storage, StorageError};

/// Longest window the dashboard endpoints accept
const MAX_DAYS: u32 = 365;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub ingestor: EventIngestor,
    pub engine: Arc<AggregationEngine>,
    pub exporter: ReportExporter,
    pub answers: AnswerGenerator,
    pub analytics: AnalyticsConfig,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        geo: GeoResolver,
        analytics: AnalyticsConfig,
        assistant: Option<Arc<dyn AnswerService>>,
    ) -> Self {
        let engine = Arc::new(AggregationEngine::new(Arc::clone(&storage), &analytics));
        Self {
            ingestor: EventIngestor::new(Arc::clone(&storage), geo),
            exporter: ReportExporter::new(Arc::clone(&storage), Arc::clone(&engine)),
            answers: AnswerGenerator::new(Arc::clone(&engine), assistant),
            engine,
            storage,
            analytics,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn storage_failure(e: StorageError) -> ApiError {
    error!(error = %e, "Storage operation failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal storage error")
}

#[derive(Deserialize)]
pub struct WindowQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    7
}

impl WindowQuery {
    fn days(&self) -> u32 {
        self.days.clamp(1, MAX_DAYS)
    }
}

#[derive(Deserialize)]
pub struct QuestionRequest {
    pub project_id: String,
    pub question: String,
    /// `7d`, `30d`, `90d` or `all`
    pub date_range: Option<String>,
}

/// The tenant's project, or 404 when it does not exist or belongs to someone else
async fn owned_project(
    state: &AppState,
    project_id: &str,
    claims: &TenantClaims,
) -> Result<Project, ApiError> {
    state
        .storage
        .find_project(project_id, ProjectKey::Tenant(&claims.tenant_id))
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Project not found"))
}

/// Public tracking endpoint called by the site snippet
pub async fn track_event(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(mut payload): Json<NewEvent>,
) -> Result<Json<Value>, ApiError> {
    payload.ip_address = resolve_client_address(
        &headers,
        Some(peer.ip()),
        payload.ip_address.as_deref(),
        &state.analytics,
    );
    payload.do_not_track = do_not_track(&headers);
    payload.user_agent = payload
        .user_agent
        .filter(|ua| !ua.trim().is_empty());
    if payload.user_agent.is_none() {
        payload.user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
    }

    match state.ingestor.ingest(payload).await {
        Ok(IngestOutcome::Tracked(event_id)) => {
            Ok(Json(json!({ "status": "tracked", "event_id": event_id })))
        }
        Ok(IngestOutcome::ConsentRequired) => Ok(Json(json!({ "status": "consent_required" }))),
        Ok(IngestOutcome::DoNotTrack) => Ok(Json(json!({ "status": "do_not_track" }))),
        Err(IngestError::InvalidProjectOrCode) => Err(api_error(
            StatusCode::FORBIDDEN,
            "Invalid project or tracking code",
        )),
        Err(IngestError::Storage(e)) => Err(storage_failure(e)),
    }
}

pub async fn get_overview(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<TenantClaims>,
    Path(project_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<RollupResult>, ApiError> {
    let project = owned_project(&state, &project_id, &claims).await?;

    state
        .engine
        .aggregate(&project.id, query.days(), Utc::now())
        .await
        .map(Json)
        .map_err(storage_failure)
}

pub async fn export_report(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<TenantClaims>,
    Path(project_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project = owned_project(&state, &project_id, &claims).await?;

    let document = state
        .exporter
        .export(&project, query.days(), Utc::now())
        .await
        .map_err(storage_failure)?;

    Ok((
        [
            (header::CONTENT_TYPE, document.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.filename),
            ),
        ],
        document.body,
    ))
}

pub async fn answer_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<TenantClaims>,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<Answer>, ApiError> {
    let project = owned_project(&state, &request.project_id, &claims).await?;
    let days = days_from_range_label(request.date_range.as_deref());

    state
        .answers
        .answer_question(&project.id, &request.question, days, Utc::now())
        .await
        .map(Json)
        .map_err(storage_failure)
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
