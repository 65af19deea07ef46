//! REST API Handlers
//!
//! Thin JSON surface over the orchestrator and the file tree. Handlers only
//! translate between HTTP and core calls; all validation happens in the core.

use crate::controlplane::backends::PoolRequest;
use crate::controlplane::orchestrator::{
    PoolCreation, ReplicationRequest, RollbackOptions, RollbackOutcome, StorageOrchestrator,
};
use crate::domain::{Dataset, PoolActivity, Snapshot, StoragePool, SubvolumeSnapshot};
use crate::error::{Error, ErrorCategory, Result};
use crate::files::{FileEntry, ItemOutcome, SafeFileTree};
use crate::hardware::ArchitectureReport;
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Dataset creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatasetRequest {
    pub pool: String,
    pub name: String,
    #[serde(default)]
    pub quota: Option<String>,
    #[serde(default)]
    pub compression: Option<String>,
}

/// Snapshot creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotRequest {
    pub dataset: String,
    pub label: String,
}

/// Rollback request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub snapshot: String,
    #[serde(flatten)]
    pub options: RollbackOptions,
}

/// Clone request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneRequest {
    pub snapshot: String,
    pub target: String,
}

/// Btrfs subvolume snapshot request; paths are relative to the pool mountpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubvolumeSnapshotRequest {
    #[serde(default = "top_level_subvolume")]
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub readonly: bool,
}

fn top_level_subvolume() -> String {
    "/".to_string()
}

/// Property update request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPropertyRequest {
    pub target: String,
    pub property: String,
    pub value: String,
}

/// Replication start response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationAccepted {
    pub source: String,
    pub target: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    dataset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubvolumePath {
    path: String,
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    path: String,
    /// Serve inline instead of as an attachment
    #[serde(default)]
    preview: bool,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    path: Option<String>,
    query: String,
    #[serde(default)]
    extension: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    #[serde(default)]
    directory: Option<String>,
    name: String,
}

/// File path request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRequest {
    pub path: String,
}

/// Batch delete request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFilesRequest {
    pub paths: Vec<String>,
    #[serde(default)]
    pub recursive: bool,
}

/// Move/copy request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source: String,
    pub destination: String,
}

/// Search hits plus the entries the walk could not read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub entries: Vec<FileEntry>,
    /// False when any entry was skipped
    pub complete: bool,
    pub skipped: Vec<ApiErrorResponse>,
}

impl SearchResults {
    /// Drain a search stream, keeping per-entry failures next to the hits
    pub async fn collect<S>(results: S) -> Self
    where
        S: Stream<Item = Result<FileEntry>>,
    {
        let (entries, skipped) = results
            .fold((Vec::new(), Vec::new()), |(mut entries, mut skipped), result| async move {
                match result {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("Search skipped an entry: {}", e);
                        skipped.push(ApiErrorResponse {
                            error: e.code().into(),
                            message: e.to_string(),
                            details: None,
                        });
                    }
                }
                (entries, skipped)
            })
            .await;

        Self {
            complete: skipped.is_empty(),
            entries,
            skipped,
        }
    }
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Core error carried to the HTTP boundary
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

/// HTTP status for a core error
pub fn status_for(error: &Error) -> StatusCode {
    if let Error::CommandUnavailable { .. } = error {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match error.category() {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::Security => StatusCode::FORBIDDEN,
        ErrorCategory::Execution | ErrorCategory::Parse => StatusCode::BAD_GATEWAY,
        ErrorCategory::Io | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }

        let details = match &self.0 {
            Error::RollbackHazard { newer, .. } => Some(newer.join(",")),
            Error::CommandExecution { command, .. } => Some(command.clone()),
            _ => None,
        };
        (
            status,
            Json(ApiErrorResponse {
                error: self.0.code().into(),
                message: self.0.to_string(),
                details,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<StorageOrchestrator>,
    files: Arc<SafeFileTree>,
    max_body_size: usize,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(orchestrator: Arc<StorageOrchestrator>, files: Arc<SafeFileTree>) -> Self {
        Self {
            orchestrator,
            files,
            max_body_size: 64 * 1024 * 1024,
        }
    }

    /// Largest accepted request body (uploads)
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
            files: self.files,
        };

        Router::new()
            // Architecture
            .route("/api/v1/architecture", get(get_architecture))
            // Pools
            .route("/api/v1/pools", get(list_pools).post(create_pool))
            .route("/api/v1/pools/:name", delete(destroy_pool))
            .route("/api/v1/pools/:name/scrub", post(start_scrub))
            .route("/api/v1/pools/:name/balance", post(start_balance))
            .route("/api/v1/pools/:name/status", get(pool_status))
            // Datasets and properties
            .route("/api/v1/datasets", get(list_datasets).post(create_dataset))
            .route("/api/v1/properties", put(set_property))
            // Snapshots
            .route(
                "/api/v1/snapshots",
                get(list_snapshots).post(create_snapshot).delete(destroy_snapshot),
            )
            .route("/api/v1/snapshots/rollback", post(rollback_snapshot))
            .route("/api/v1/snapshots/clone", post(clone_snapshot))
            .route(
                "/api/v1/pools/:name/subvolume-snapshots",
                get(list_subvolume_snapshots)
                    .post(create_subvolume_snapshot)
                    .delete(delete_subvolume_snapshot),
            )
            // Replication
            .route("/api/v1/replications", post(start_replication))
            // Files
            .route("/api/v1/files", get(list_files).delete(delete_files))
            .route("/api/v1/files/mkdir", post(make_directory))
            .route("/api/v1/files/move", post(move_file))
            .route("/api/v1/files/copy", post(copy_file))
            .route("/api/v1/files/search", get(search_files))
            .route("/api/v1/files/download", get(download_file))
            .route("/api/v1/files/upload", put(upload_file))
            // Health
            .route("/health", get(health_check))
            .layer(DefaultBodyLimit::max(self.max_body_size))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<StorageOrchestrator>,
    files: Arc<SafeFileTree>,
}

// =============================================================================
// Architecture & Pool Handlers
// =============================================================================

async fn get_architecture(State(state): State<AppState>) -> Json<ArchitectureReport> {
    Json(state.orchestrator.architecture_report())
}

async fn list_pools(State(state): State<AppState>) -> ApiResult<Json<Vec<StoragePool>>> {
    Ok(Json(state.orchestrator.list_pools().await?))
}

async fn create_pool(
    State(state): State<AppState>,
    Json(request): Json<PoolRequest>,
) -> ApiResult<(StatusCode, Json<PoolCreation>)> {
    info!("Creating pool: {}", request.name);
    let created = state.orchestrator.create_pool(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn destroy_pool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.orchestrator.destroy_pool(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_scrub(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.orchestrator.scrub(&name).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn start_balance(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.orchestrator.balance(&name).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn pool_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<PoolActivity>> {
    Ok(Json(state.orchestrator.status(&name).await?))
}

// =============================================================================
// Dataset & Snapshot Handlers
// =============================================================================

async fn list_datasets(State(state): State<AppState>) -> ApiResult<Json<Vec<Dataset>>> {
    Ok(Json(state.orchestrator.list_datasets().await?))
}

async fn create_dataset(
    State(state): State<AppState>,
    Json(request): Json<CreateDatasetRequest>,
) -> ApiResult<(StatusCode, Json<Dataset>)> {
    let dataset = state
        .orchestrator
        .create_dataset(
            &request.pool,
            &request.name,
            request.quota.as_deref(),
            request.compression.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(dataset)))
}

async fn set_property(
    State(state): State<AppState>,
    Json(request): Json<SetPropertyRequest>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .set_property(&request.target, &request.property, &request.value)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_snapshots(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<Json<Vec<Snapshot>>> {
    Ok(Json(
        state
            .orchestrator
            .list_snapshots(query.dataset.as_deref())
            .await?,
    ))
}

async fn create_snapshot(
    State(state): State<AppState>,
    Json(request): Json<CreateSnapshotRequest>,
) -> ApiResult<(StatusCode, Json<Snapshot>)> {
    let snapshot = state
        .orchestrator
        .snapshot(&request.dataset, &request.label)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn destroy_snapshot(
    State(state): State<AppState>,
    Query(query): Query<SnapshotName>,
) -> ApiResult<StatusCode> {
    state.orchestrator.destroy_snapshot(&query.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rollback_snapshot(
    State(state): State<AppState>,
    Json(request): Json<RollbackRequest>,
) -> ApiResult<Json<RollbackOutcome>> {
    Ok(Json(
        state
            .orchestrator
            .rollback(&request.snapshot, request.options)
            .await?,
    ))
}

async fn clone_snapshot(
    State(state): State<AppState>,
    Json(request): Json<CloneRequest>,
) -> ApiResult<(StatusCode, Json<Dataset>)> {
    let dataset = state
        .orchestrator
        .clone_snapshot(&request.snapshot, &request.target)
        .await?;
    Ok((StatusCode::CREATED, Json(dataset)))
}

async fn list_subvolume_snapshots(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<SubvolumeSnapshot>>> {
    Ok(Json(state.orchestrator.list_subvolume_snapshots(&name).await?))
}

async fn create_subvolume_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<CreateSubvolumeSnapshotRequest>,
) -> ApiResult<(StatusCode, Json<SubvolumeSnapshot>)> {
    let snapshot = state
        .orchestrator
        .create_subvolume_snapshot(&name, &request.source, &request.destination, request.readonly)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn delete_subvolume_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SubvolumePath>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .delete_subvolume_snapshot(&name, &query.path)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_replication(
    State(state): State<AppState>,
    Json(request): Json<ReplicationRequest>,
) -> ApiResult<(StatusCode, Json<ReplicationAccepted>)> {
    // The job runs detached; its outcome is logged by the orchestrator
    let job = state.orchestrator.send_receive(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ReplicationAccepted {
            source: job.source.clone(),
            target: job.target.clone(),
            status: "started".into(),
        }),
    ))
}

// =============================================================================
// File Handlers
// =============================================================================

fn path_or_root(path: &Option<String>) -> &str {
    path.as_deref().unwrap_or("/")
}

async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<Vec<FileEntry>>> {
    Ok(Json(state.files.list(path_or_root(&query.path)).await?))
}

async fn make_directory(
    State(state): State<AppState>,
    Json(request): Json<PathRequest>,
) -> ApiResult<(StatusCode, Json<FileEntry>)> {
    let entry = state.files.mkdir(&request.path).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn delete_files(
    State(state): State<AppState>,
    Json(request): Json<DeleteFilesRequest>,
) -> Json<Vec<ItemOutcome>> {
    Json(state.files.delete_many(request.paths.as_slice(), request.recursive).await)
}

async fn move_file(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<Json<FileEntry>> {
    Ok(Json(
        state
            .files
            .move_entry(&request.source, &request.destination)
            .await?,
    ))
}

async fn copy_file(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<(StatusCode, Json<FileEntry>)> {
    let entry = state
        .files
        .copy(&request.source, &request.destination)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn search_files(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResults>> {
    let results = state
        .files
        .search(
            path_or_root(&params.path),
            &params.query,
            params.extension.as_deref(),
        )
        .await?;
    Ok(Json(SearchResults::collect(results).await))
}

async fn download_file(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> ApiResult<Response> {
    let download = state.files.download(&params.path).await?;
    let disposition = if params.preview {
        "inline".to_string()
    } else {
        let name: String = download
            .entry
            .name
            .chars()
            .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
            .collect();
        format!("attachment; filename=\"{}\"", name)
    };
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(download.chunks),
    )
        .into_response())
}

async fn upload_file(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<FileEntry>)> {
    let entry = state
        .files
        .upload(path_or_root(&params.directory), &params.name, &body)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::orchestrator::OrchestratorConfig;
    use crate::controlplane::testing::{zpool_line, ScriptedRunner};
    use crate::domain::{Backend, CommandOutput};
    use crate::files::FileTreeConfig;
    use crate::hardware::{ArchitectureProfile, HwFeature};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(runner: Arc<ScriptedRunner>) -> (TempDir, Router) {
        app_with_backends(runner, vec![Backend::Zfs]).await
    }

    async fn app_with_backends(runner: Arc<ScriptedRunner>, enabled_backends: Vec<Backend>) -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let files = SafeFileTree::open(FileTreeConfig {
            root: dir.path().join("uploads"),
        })
        .await
        .unwrap();
        let orchestrator = StorageOrchestrator::new(
            OrchestratorConfig {
                enabled_backends,
                ..Default::default()
            },
            runner,
            ArchitectureProfile::new("aarch64", [HwFeature::Neon]),
        );
        (dir, RestRouter::new(orchestrator, Arc::new(files)).build())
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_architecture_report() {
        let (_dir, app) = app(ScriptedRunner::new()).await;
        let (status, json) = send(&app, Method::GET, "/api/v1/architecture", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["isArm"], true);
        assert_eq!(json["tuningParameters"]["primarycache"], "metadata");
        assert_eq!(json["tuningParameters"]["compression"], "lz4");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let runner = ScriptedRunner::new();
        runner.on(&["zpool", "list"], CommandOutput::ok(zpool_line("tank")));
        let (_dir, app) = app(runner).await;

        let body = serde_json::json!({"pool": "ghost", "name": "data"});
        let (status, json) = send(&app, Method::POST, "/api/v1/datasets", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "pool_not_found");

        let body = serde_json::json!({
            "name": "p1", "backend": "zfs", "devices": ["sda"], "raidLevel": "mirror"
        });
        let (status, json) = send(&app, Method::POST, "/api/v1/pools", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_device");

        let (status, json) = send(&app, Method::GET, "/api/v1/files?path=../../etc", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "path_traversal");
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let (_dir, app) = app(ScriptedRunner::new()).await;

        let body = serde_json::json!({"path": "/docs"});
        let (status, _) = send(&app, Method::POST, "/api/v1/files/mkdir", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, json) = send(&app, Method::GET, "/api/v1/files?path=/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["name"], "docs");
        assert_eq!(json[0]["isDirectory"], true);

        let body = serde_json::json!({"paths": ["/docs", "/missing"]});
        let (status, json) = send(&app, Method::DELETE, "/api/v1/files", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["success"], true);
        assert_eq!(json[1]["error"], "not_found");
    }

    #[tokio::test]
    async fn test_download_streams_file() {
        let (dir, app) = app(ScriptedRunner::new()).await;
        std::fs::create_dir(dir.path().join("uploads/docs")).unwrap();
        std::fs::write(dir.path().join("uploads/docs/report.txt"), b"quarterly numbers").unwrap();

        let request = Request::builder()
            .uri("/api/v1/files/download?path=/docs/report.txt")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report.txt\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"quarterly numbers");

        let request = Request::builder()
            .uri("/api/v1/files/download?path=/docs/report.txt&preview=true")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_DISPOSITION], "inline");

        let (status, json) = send(&app, Method::GET, "/api/v1/files/download?path=/docs", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "not_a_file");

        let (status, json) =
            send(&app, Method::GET, "/api/v1/files/download?path=../../etc/passwd", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "path_traversal");
    }

    #[tokio::test]
    async fn test_subvolume_snapshot_routes() {
        let runner = ScriptedRunner::new();
        let listed = "ID 257 gen 10 cgen 10 top level 5 otime 2024-01-01 10:00:00 path snaps/a\n";
        runner
            .on(
                &["btrfs", "filesystem", "show"],
                CommandOutput::ok("Label: 'media'  uuid: x\n\tdevid 1 size 100 used 10 path /dev/sdb\n"),
            )
            .on(&["btrfs", "subvolume", "list"], CommandOutput::ok(""))
            .on(&["btrfs", "subvolume", "list"], CommandOutput::ok(listed))
            .on(&["btrfs", "subvolume", "snapshot"], CommandOutput::ok(""))
            .on(&["btrfs", "subvolume", "delete"], CommandOutput::ok(""));
        let (_dir, app) = app_with_backends(runner.clone(), vec![Backend::Btrfs]).await;

        let body = serde_json::json!({"destination": "snaps/a", "readonly": true});
        let (status, json) = send(
            &app,
            Method::POST,
            "/api/v1/pools/media/subvolume-snapshots",
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["id"], 257);
        assert_eq!(json["path"], "snaps/a");
        assert_eq!(
            runner.count(&["btrfs", "subvolume", "snapshot", "-r", "/mnt/media", "/mnt/media/snaps/a"]),
            1
        );

        let (status, json) =
            send(&app, Method::GET, "/api/v1/pools/media/subvolume-snapshots", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["createdAt"], "2024-01-01T10:00:00Z");

        let (status, _) = send(
            &app,
            Method::DELETE,
            "/api/v1/pools/media/subvolume-snapshots?path=snaps/a",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(runner.count(&["btrfs", "subvolume", "delete", "/mnt/media/snaps/a"]), 1);
    }

    #[tokio::test]
    async fn test_search_reports_skipped_entries() {
        let hit = FileEntry {
            name: "a.log".into(),
            relative_path: "/a.log".into(),
            is_directory: false,
            size_bytes: 3,
            modified_at: None,
            created_at: None,
        };
        let walk = futures::stream::iter(vec![
            Ok(hit.clone()),
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "locked/",
            ))),
        ]);

        let results = SearchResults::collect(walk).await;
        assert_eq!(results.entries, vec![hit]);
        assert!(!results.complete);
        assert_eq!(results.skipped.len(), 1);
        assert_eq!(results.skipped[0].error, "io_error");

        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["complete"], false);
        assert_eq!(json["skipped"][0]["error"], "io_error");
    }

    #[tokio::test]
    async fn test_search_endpoint_returns_entries_and_completeness() {
        let (dir, app) = app(ScriptedRunner::new()).await;
        std::fs::write(dir.path().join("uploads/notes.txt"), b"hi").unwrap();

        let (status, json) =
            send(&app, Method::GET, "/api/v1/files/search?query=notes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["entries"][0]["relativePath"], "/notes.txt");
        assert_eq!(json["complete"], true);
        assert_eq!(json["skipped"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&Error::PoolExists { pool: "p".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::CommandUnavailable { program: "zpool".into() }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&Error::CommandExecution {
                command: "zpool scrub tank".into(),
                exit_code: 1,
                stderr: String::new(),
            }),
            StatusCode::BAD_GATEWAY
        );
    }
}
