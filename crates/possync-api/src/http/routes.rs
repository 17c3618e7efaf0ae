//! HTTP route definitions and handlers.

use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use possync_domain::{Batch, DomainError, LedgerStatus, Operation, RawRecord, DEFAULT_BATCH_VERSION};
use possync_server::{new_job_id, QueueError, StatusQuery};
use possync_storage::{validate_table, StorageError, SyncLog, SyncStore};

use super::state::AppState;
use crate::middleware::{
    cors_layer, ActivityLayer, AuthLayer, ClientId, MetricsLayer, RequestLoggingLayer,
    RequestMetrics,
};
use crate::observability::{metrics_handler, MetricsState};

/// Default request body size limit (100MB). POS terminals upload whole DBF
/// extracts in one batch, so the ceiling is generous.
pub const DEFAULT_BODY_LIMIT: usize = 100 * 1024 * 1024;

// ============================================================
// Router construction
// ============================================================

/// Router construction options, from the `server.*` and `auth.*`
/// configuration sections.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Maximum request body size in bytes.
    pub body_limit_bytes: usize,
    /// Require an `X-API-Key` header on API routes.
    pub auth_enabled: bool,
    /// Attach a permissive CORS layer.
    pub cors_enabled: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            body_limit_bytes: DEFAULT_BODY_LIMIT,
            auth_enabled: false,
            cors_enabled: false,
        }
    }
}

/// Private helper for the API routes proper (everything that takes state).
fn api_routes<S: SyncStore>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route("/tables/:table/batches", post(submit_batch::<S>))
        .route("/tables/:table/status", post(batch_status::<S>))
        .route("/jobs/:job_id", get(job_status::<S>))
        .route(
            "/clients/sync-log",
            put(put_sync_log::<S>).get(get_sync_log::<S>),
        )
}

/// Creates the HTTP router with default options and no metrics endpoint.
pub fn create_router<S: SyncStore>(state: AppState<S>) -> Router {
    create_router_with_options(state, RouterOptions::default(), None)
}

/// Creates the HTTP router.
///
/// `/metrics` is mounted only when `metrics_state` is present. Health,
/// readiness and metrics endpoints bypass authentication and activity
/// tracking.
pub fn create_router_with_options<S: SyncStore>(
    state: AppState<S>,
    options: RouterOptions,
    metrics_state: Option<MetricsState>,
) -> Router {
    let shared_state = Arc::new(state);
    let store = Arc::clone(&shared_state.store);
    let tracker = Arc::clone(&shared_state.tracker);

    let mut router = api_routes::<S>()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check::<S>))
        .with_state(shared_state)
        .layer(RequestBodyLimitLayer::new(options.body_limit_bytes))
        .layer(ActivityLayer::new(tracker));

    if options.auth_enabled {
        router = router.layer(AuthLayer::new(store));
    }
    if options.cors_enabled {
        router = router.layer(cors_layer());
    }
    if let Some(metrics_state) = metrics_state {
        let observability_router = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(metrics_state);
        router = router.merge(observability_router);
    }

    router
        .layer(MetricsLayer::new(Arc::new(RequestMetrics::new())))
        .layer(RequestLoggingLayer::new())
}

// ============================================================
// Error handling
// ============================================================

/// Wire error codes, carried in the `code` field of every error response.
///
/// The submission codes mirror what terminals in the field already parse,
/// so they are load-bearing strings: do not rename.
pub mod error_codes {
    // 400 Bad Request
    pub const MISSING_OPERATION: &str = "MISSING_OPERATION";
    pub const MISSING_FIELD_ID: &str = "MISSING_FIELD_ID";
    pub const MISSING_CLIENT_ID: &str = "MISSING_CLIENT_ID";
    pub const INVALID_RECORDS: &str = "INVALID_RECORDS";
    pub const EMPTY_RECORDS: &str = "EMPTY_RECORDS";
    pub const INVALID_TABLE: &str = "INVALID_TABLE";
    pub const INVALID_NDJSON: &str = "INVALID_NDJSON";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";

    // 401 Unauthorized
    pub const MISSING_API_KEY: &str = "MISSING_API_KEY";
    pub const INVALID_API_KEY: &str = "INVALID_API_KEY";

    // 404 Not Found
    pub const JOB_NOT_FOUND: &str = "JOB_NOT_FOUND";
    pub const SYNC_LOG_NOT_FOUND: &str = "SYNC_LOG_NOT_FOUND";

    // 413 Payload Too Large
    pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";

    // 5xx
    pub const QUEUE_FULL: &str = "QUEUE_FULL";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn missing_operation() -> Self {
        Self::new(error_codes::MISSING_OPERATION, "operation is required")
    }

    pub fn missing_field_id() -> Self {
        Self::new(error_codes::MISSING_FIELD_ID, "field_id is required")
    }

    pub fn missing_client_id() -> Self {
        Self::new(error_codes::MISSING_CLIENT_ID, "client_id is required")
    }

    pub fn invalid_records(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_RECORDS, message)
    }

    pub fn empty_records() -> Self {
        Self::new(error_codes::EMPTY_RECORDS, "records must not be empty")
    }

    pub fn invalid_table(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_TABLE, message)
    }

    pub fn invalid_ndjson(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_NDJSON, message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::VALIDATION_ERROR, message)
    }

    pub fn missing_api_key() -> Self {
        Self::new(error_codes::MISSING_API_KEY, "API key is required")
    }

    pub fn invalid_api_key() -> Self {
        Self::new(error_codes::INVALID_API_KEY, "API key is not valid")
    }

    pub fn job_not_found(message: impl Into<String>) -> Self {
        Self::new(error_codes::JOB_NOT_FOUND, message)
    }

    pub fn sync_log_not_found(message: impl Into<String>) -> Self {
        Self::new(error_codes::SYNC_LOG_NOT_FOUND, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(error_codes::PAYLOAD_TOO_LARGE, message)
    }

    pub fn queue_full(message: impl Into<String>) -> Self {
        Self::new(error_codes::QUEUE_FULL, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(error_codes::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use error_codes::*;

        let status = match self.code.as_str() {
            MISSING_OPERATION | MISSING_FIELD_ID | MISSING_CLIENT_ID | INVALID_RECORDS
            | EMPTY_RECORDS | INVALID_TABLE | INVALID_NDJSON | VALIDATION_ERROR => {
                StatusCode::BAD_REQUEST
            }

            MISSING_API_KEY | INVALID_API_KEY => StatusCode::UNAUTHORIZED,

            JOB_NOT_FOUND | SYNC_LOG_NOT_FOUND => StatusCode::NOT_FOUND,

            PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,

            QUEUE_FULL | SERVICE_UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::InvalidInput { message } => ApiError::validation_error(message),
            _ if err.is_transient() => {
                error!("Storage unavailable: {}", err);
                ApiError::service_unavailable("storage backend unavailable")
            }
            _ => {
                error!("Storage error: {}", err);
                ApiError::internal_error(err.to_string())
            }
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match &err {
            DomainError::EmptyBatch => ApiError::empty_records(),
            DomainError::MissingRecordId { .. } => ApiError::invalid_records(err.to_string()),
            DomainError::InvalidIdentifier { .. } | DomainError::InvalidOperation { .. } => {
                ApiError::validation_error(err.to_string())
            }
            DomainError::SchemaParseError { .. } => {
                error!("Schema error: {}", err);
                ApiError::internal_error(err.to_string())
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================
// Body extractors
// ============================================================

/// JSON extractor that answers 400 with the API error shape instead of
/// axum's default 422, preserving 413 for bodies over the limit.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    Err(ApiError::payload_too_large(rejection.body_text()))
                } else {
                    Err(ApiError::validation_error(rejection.body_text()))
                }
            }
        }
    }
}

/// Raw body extractor for the submission endpoint, which parses JSON or
/// NDJSON itself depending on the content type.
pub struct RawBody(pub Bytes);

#[async_trait]
impl<S> FromRequest<S> for RawBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Bytes::from_request(req, state).await {
            Ok(bytes) => Ok(RawBody(bytes)),
            Err(rejection) => {
                if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    Err(ApiError::payload_too_large(rejection.body_text()))
                } else {
                    Err(ApiError::validation_error(rejection.body_text()))
                }
            }
        }
    }
}

// ============================================================
// Health and readiness
// ============================================================

/// Liveness probe. Process is up; dependencies are not checked.
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe: one cheap round trip to the backing store.
async fn readiness_check<S: SyncStore>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "storage": "ok" }
            })),
        ),
        Err(err) => {
            error!("Readiness check failed: storage unavailable: {}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "checks": { "storage": "unavailable" }
                })),
            )
        }
    }
}

// ============================================================
// Batch submission
// ============================================================

/// Query-string metadata, used by NDJSON submissions.
#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub field_id: Option<String>,
    #[serde(default)]
    pub batch_version: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// JSON submission body.
///
/// Everything is optional at the serde level so missing pieces map to the
/// coded validation errors instead of a generic deserialization failure.
#[derive(Debug, Deserialize)]
pub struct SubmitBatchBody {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub field_id: Option<String>,
    #[serde(default)]
    pub batch_version: Option<String>,
    #[serde(default)]
    pub records: Option<JsonValue>,
}

/// Accepted-submission receipt.
#[derive(Debug, Serialize)]
pub struct SubmitBatchResponse {
    pub job_id: String,
    pub status: &'static str,
    pub records: usize,
}

/// Batch metadata regardless of how it arrived (JSON body or query string).
struct SubmissionMeta {
    operation: Option<String>,
    client_id: Option<String>,
    field_id: Option<String>,
    batch_version: Option<String>,
}

impl From<BatchQuery> for SubmissionMeta {
    fn from(query: BatchQuery) -> Self {
        SubmissionMeta {
            operation: query.operation,
            client_id: query.client_id,
            field_id: query.field_id,
            batch_version: query.batch_version,
        }
    }
}

fn is_ndjson(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|content_type| {
            content_type.starts_with("application/x-ndjson")
                || content_type.starts_with("text/plain")
        })
        .unwrap_or(false)
}

/// Parses one JSON document per non-empty line.
fn parse_ndjson(body: &[u8]) -> ApiResult<Vec<JsonValue>> {
    let text = std::str::from_utf8(body)
        .map_err(|_| ApiError::invalid_ndjson("body is not valid UTF-8"))?;
    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line)
            .map_err(|err| ApiError::invalid_ndjson(format!("line {}: {err}", index + 1)))?;
        records.push(record);
    }
    Ok(records)
}

/// Resolves the effective client id. The authenticated identity always wins
/// over anything the payload claims.
fn resolve_client_id(
    authenticated: Option<Extension<ClientId>>,
    supplied: Option<String>,
) -> ApiResult<String> {
    authenticated
        .map(|Extension(ClientId(client_id))| client_id)
        .or(supplied)
        .filter(|client_id| !client_id.is_empty())
        .ok_or_else(ApiError::missing_client_id)
}

/// Accepts a batch, pre-registers it in the ledger and queues it for apply.
async fn submit_batch<S: SyncStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(table): Path<String>,
    Query(query): Query<BatchQuery>,
    client: Option<Extension<ClientId>>,
    headers: HeaderMap,
    RawBody(body): RawBody,
) -> ApiResult<impl IntoResponse> {
    let table = validate_table(&table).map_err(|err| ApiError::invalid_table(err.to_string()))?;
    if state.registry.strict_tables() && state.registry.load(&table).is_none() {
        return Err(ApiError::invalid_table(format!(
            "no schema registered for table '{table}'"
        )));
    }

    let (meta, raw_records) = if is_ndjson(&headers) {
        (SubmissionMeta::from(query), parse_ndjson(&body)?)
    } else {
        let body: SubmitBatchBody = serde_json::from_slice(&body)
            .map_err(|err| ApiError::validation_error(format!("malformed JSON body: {err}")))?;
        let records = match body.records {
            Some(JsonValue::Array(records)) => records,
            Some(_) => return Err(ApiError::invalid_records("records must be an array")),
            None => return Err(ApiError::invalid_records("records is required")),
        };
        let meta = SubmissionMeta {
            operation: body.operation,
            client_id: body.client_id,
            field_id: body.field_id,
            batch_version: body.batch_version,
        };
        (meta, records)
    };

    let operation = meta
        .operation
        .filter(|operation| !operation.is_empty())
        .ok_or_else(ApiError::missing_operation)?;
    let operation = Operation::parse_lossy(&operation);
    let field_id = meta
        .field_id
        .filter(|field_id| !field_id.is_empty())
        .ok_or_else(ApiError::missing_field_id)?;
    let client_id = resolve_client_id(client, meta.client_id)?;
    let batch_version = meta
        .batch_version
        .filter(|version| !version.is_empty())
        .unwrap_or_else(|| DEFAULT_BATCH_VERSION.to_string());

    if raw_records.is_empty() {
        return Err(ApiError::empty_records());
    }
    let records: Vec<RawRecord> = raw_records.into_iter().map(RawRecord::from_json).collect();

    let batch = Batch {
        operation,
        table_name: table,
        client_id,
        field_id,
        batch_version,
        records,
        job_id: new_job_id(),
    };

    // Best-effort QUEUED pre-registration; the worker overwrites it with
    // PROCESSING when the apply starts.
    if let Err(err) = state.store.mark_batch(&batch, LedgerStatus::Queued).await {
        warn!(job_id = %batch.job_id, error = %err, "queued pre-registration failed");
    }

    let job_id = batch.job_id.clone();
    let records_accepted = batch.records.len();
    info!(
        job_id = %job_id,
        table = %batch.table_name,
        operation = batch.operation.as_str(),
        client_id = %batch.client_id,
        records = records_accepted,
        "batch accepted"
    );

    state.queue.enqueue(batch).map_err(|err| match err {
        QueueError::Full { .. } => ApiError::queue_full(err.to_string()),
        QueueError::Closed => ApiError::service_unavailable("queue is closed"),
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitBatchResponse {
            job_id,
            status: "queued",
            records: records_accepted,
        }),
    ))
}

// ============================================================
// Status poll
// ============================================================

/// Status poll body.
#[derive(Debug, Deserialize)]
pub struct StatusRequestBody {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub field_id: Option<String>,
    #[serde(default)]
    pub batch_version: Option<String>,
    pub records: Vec<StatusRecordRef>,
}

/// One polled record. `job_id` is accepted for symmetry with the submit
/// receipt; resolution is ledger-first and does not consult the queue.
#[derive(Debug, Deserialize)]
pub struct StatusRecordRef {
    pub id: String,
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Resolves the sync status of each polled record.
async fn batch_status<S: SyncStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(table): Path<String>,
    client: Option<Extension<ClientId>>,
    JsonBody(body): JsonBody<StatusRequestBody>,
) -> ApiResult<impl IntoResponse> {
    let table = validate_table(&table).map_err(|err| ApiError::invalid_table(err.to_string()))?;
    let field_id = body
        .field_id
        .filter(|field_id| !field_id.is_empty())
        .ok_or_else(ApiError::missing_field_id)?;
    let client_id = resolve_client_id(client, body.client_id)?;
    if body.records.is_empty() {
        return Err(ApiError::empty_records());
    }

    let query = StatusQuery {
        table,
        field_id,
        client_id,
        batch_version: body
            .batch_version
            .unwrap_or_else(|| DEFAULT_BATCH_VERSION.to_string()),
        record_ids: body.records.into_iter().map(|record| record.id).collect(),
    };

    let report = state.status.check_status(&query).await?;
    Ok(Json(report))
}

// ============================================================
// Job lookup
// ============================================================

/// Returns the queue-side lifecycle state of a submitted batch.
async fn job_status<S: SyncStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let Some(job) = state.queue.job(&job_id) else {
        return Err(ApiError::job_not_found(format!("unknown job id '{job_id}'")));
    };
    let mut payload =
        serde_json::to_value(&job).map_err(|err| ApiError::internal_error(err.to_string()))?;
    payload["job_id"] = json!(job_id);
    Ok(Json(payload))
}

// ============================================================
// Client sync log
// ============================================================

/// Sync-log upsert body.
#[derive(Debug, Deserialize)]
pub struct SyncLogBody {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub files_total: i64,
    #[serde(default)]
    pub files_synced: i64,
}

/// Query for the sync-log fetch when auth is disabled.
#[derive(Debug, Deserialize)]
pub struct SyncLogQuery {
    #[serde(default)]
    pub client_id: Option<String>,
}

async fn put_sync_log<S: SyncStore>(
    State(state): State<Arc<AppState<S>>>,
    client: Option<Extension<ClientId>>,
    JsonBody(body): JsonBody<SyncLogBody>,
) -> ApiResult<impl IntoResponse> {
    let client_id = resolve_client_id(client, body.client_id)?;
    let log = SyncLog {
        client_id,
        last_sync_at: body.last_sync_at,
        app_version: body.app_version,
        files_total: body.files_total,
        files_synced: body.files_synced,
        updated_at: None,
    };
    let stored = state.store.upsert_sync_log(&log).await?;
    Ok(Json(stored))
}

async fn get_sync_log<S: SyncStore>(
    State(state): State<Arc<AppState<S>>>,
    client: Option<Extension<ClientId>>,
    Query(query): Query<SyncLogQuery>,
) -> ApiResult<impl IntoResponse> {
    let client_id = resolve_client_id(client, query.client_id)?;
    match state.store.sync_log(&client_id).await? {
        Some(log) => Ok(Json(log)),
        None => Err(ApiError::sync_log_not_found(format!(
            "no sync log for client '{client_id}'"
        ))),
    }
}
