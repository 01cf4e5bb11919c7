use crate::errors::AppError;
use crate::models::{DayPassStatus, Lead, LeadQueryParams, LeadStatus, NoteUpdate, ScanRequest};
use crate::pipeline::{LeadPipeline, ScanParams};
use crate::quota::QuotaEnforcer;
use crate::session::SessionResolver;
use crate::storage::{LeadFilter, LeadStore};
use crate::stream::NDJSON_CONTENT_TYPE;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Most leads a listing returns.
const LEAD_LIST_LIMIT: i64 = 100;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Scan orchestrator (providers, scorer, gate, quota).
    pub pipeline: Arc<LeadPipeline>,
    /// Resolves the acting user from request credentials.
    pub sessions: Arc<SessionResolver>,
    pub leads: Arc<dyn LeadStore>,
    pub quota: Arc<QuotaEnforcer>,
}

/// Routes under `/api`, without rate limiting or tracing layers.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leads/scrape", post(scan_leads))
        .route("/api/leads", get(list_leads))
        .route("/api/leads/:id/note", patch(update_note))
        .route("/api/user/day-pass", get(day_pass_status))
}

/// Full application router minus the network-facing middleware `main` adds.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-lead-scout",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/leads/scrape
///
/// Runs a scan and streams accepted leads back as newline-delimited JSON:
/// one `meta` line, then one `lead` line per accepted candidate. Auth, quota,
/// input and acquisition failures are returned as a plain JSON error before
/// the stream starts.
pub async fn scan_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let session = state.sessions.require(&headers, &query).await?;
    let request = json_body(payload, "searchQuery, location")?;
    let params = ScanParams::from_request(&request, state.pipeline.config())?;

    tracing::info!(
        "POST /api/leads/scrape - user {} query='{}' location='{}'",
        session.user_id,
        params.query,
        params.location
    );

    let scan = state.pipeline.start(session.user_id, params).await?;

    Ok((
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        scan.into_body(),
    )
        .into_response())
}

/// GET /api/leads?status=&minScore=
///
/// Highest-scoring leads first, at most 100.
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.sessions.require(&headers, &query).await?;

    let params = parse_lead_query(&query)?;
    let status = match params.status.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => Some(
            LeadStatus::parse(raw)
                .ok_or_else(|| AppError::InvalidInput(format!("unknown status '{}'", raw)))?,
        ),
        None => None,
    };
    let filter = LeadFilter {
        status,
        min_score: params.min_score,
    };

    let leads: Vec<Lead> = state.leads.list(&filter, LEAD_LIST_LIMIT).await?;
    tracing::debug!("GET /api/leads - {} lead(s)", leads.len());

    Ok(Json(json!({
        "success": true,
        "leads": leads
    })))
}

/// PATCH /api/leads/:id/note
pub async fn update_note(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Path(id): Path<Uuid>,
    payload: Result<Json<NoteUpdate>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.sessions.require(&headers, &query).await?;
    let update = json_body(payload, "notes")?;

    let lead = state
        .leads
        .update_notes(id, update.notes)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Lead {}", id)))?;

    tracing::info!("Updated notes for lead {}", id);
    Ok(Json(json!({
        "success": true,
        "lead": lead
    })))
}

/// GET /api/user/day-pass
///
/// Current pass counters. An expired pass is deactivated as a side effect
/// and reported with `expired: true`.
pub async fn day_pass_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<DayPassStatus>, AppError> {
    let session = state.sessions.require(&headers, &query).await?;
    let status = state.quota.day_pass_status(session.user_id).await?;
    Ok(Json(status))
}

/// Turns body rejections into the usual `{"error": ...}` responses. A request
/// without a JSON body is reported as missing `required`.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>, required: &str) -> Result<T, AppError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(JsonRejection::MissingJsonContentType(_)) => {
            Err(AppError::MissingInput(required.to_string()))
        }
        Err(rejection) => Err(AppError::InvalidInput(rejection.body_text())),
    }
}

/// The raw query map doubles as the dev-auth source, so typed params are
/// pulled out of it rather than through a second extractor.
fn parse_lead_query(query: &HashMap<String, String>) -> Result<LeadQueryParams, AppError> {
    let min_score = match query.get("minScore").map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<i32>()
                .map_err(|_| AppError::InvalidInput(format!("minScore '{}' is not a number", raw)))?,
        ),
        None => None,
    };
    Ok(LeadQueryParams {
        status: query.get("status").cloned(),
        min_score,
    })
}
