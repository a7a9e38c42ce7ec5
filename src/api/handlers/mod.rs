use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::engine::{Engine, DEFAULT_EVENT_LIMIT};
use crate::error::EngineError;
use crate::models::*;

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Map an engine error to a status code and client-facing message.
///
/// Caller errors are returned as-is so the client can act on them. IO and
/// database failures are logged in full server-side, but clients only see a
/// generic message to avoid leaking paths and internals.
fn engine_error(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::NotFound { .. } | EngineError::NothingToUndo => StatusCode::NOT_FOUND,
        EngineError::InvalidName { .. } => StatusCode::BAD_REQUEST,
        EngineError::NameCollision { .. } => StatusCode::CONFLICT,
        EngineError::Backup { .. } => {
            tracing::error!("Backup error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
        EngineError::Io { .. }
        | EngineError::Database(_)
        | EngineError::GracefulStopTimeout { .. } => {
            tracing::error!("Internal error: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };

    tracing::warn!("Request rejected: {}", e);
    (status, e.to_string())
}

// ============================================================
// Library & Projects
// ============================================================

pub async fn list_library(State(engine): State<Engine>) -> ApiResult<Json<Vec<LibraryFile>>> {
    engine.list_library().map(Json).map_err(engine_error)
}

pub async fn list_projects(
    State(engine): State<Engine>,
) -> ApiResult<Json<Vec<ProjectSummary>>> {
    engine.list_projects().map(Json).map_err(engine_error)
}

pub async fn list_project_files(
    State(engine): State<Engine>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<ProjectFile>>> {
    engine.project_files(&name).map(Json).map_err(engine_error)
}

pub async fn record_heartbeat(
    State(engine): State<Engine>,
    Path(name): Path<String>,
    Json(input): Json<HeartbeatInput>,
) -> ApiResult<StatusCode> {
    engine
        .record_heartbeat(&name, input)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(engine_error)
}

// ============================================================
// Assignment & Removal
// ============================================================

pub async fn assign(
    State(engine): State<Engine>,
    Json(input): Json<AssignInput>,
) -> ApiResult<(StatusCode, Json<AssignResult>)> {
    engine
        .assign(input)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
        .map_err(engine_error)
}

pub async fn remove_file(
    State(engine): State<Engine>,
    Path((name, filename)): Path<(String, String)>,
) -> ApiResult<Json<RemoveResult>> {
    engine
        .remove(&name, &filename)
        .await
        .map(Json)
        .map_err(engine_error)
}

pub async fn clear_project(
    State(engine): State<Engine>,
    Path(name): Path<String>,
) -> ApiResult<Json<ClearResult>> {
    engine.clear(&name).await.map(Json).map_err(engine_error)
}

/// Responds 207 when some files could not be removed.
pub async fn stop_all(
    State(engine): State<Engine>,
) -> ApiResult<(StatusCode, Json<StopAllResult>)> {
    let result = engine.stop_all().await.map_err(engine_error)?;
    let status = if result.failures.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(result)))
}

// ============================================================
// Snapshots & Undo
// ============================================================

pub async fn undo(State(engine): State<Engine>) -> ApiResult<Json<UndoResult>> {
    engine.undo().await.map(Json).map_err(engine_error)
}

/// The body is optional; an empty request creates a timestamp-named snapshot.
pub async fn create_snapshot(
    State(engine): State<Engine>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SnapshotSummary>)> {
    let input: CreateSnapshotInput = if body.is_empty() {
        CreateSnapshotInput::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid snapshot request: {e}")))?
    };
    engine
        .create_snapshot(input.name)
        .await
        .map(|s| (StatusCode::CREATED, Json(s)))
        .map_err(engine_error)
}

pub async fn list_snapshots(
    State(engine): State<Engine>,
) -> ApiResult<Json<Vec<SnapshotSummary>>> {
    engine.list_snapshots().map(Json).map_err(engine_error)
}

pub async fn restore_snapshot(
    State(engine): State<Engine>,
    Path(name): Path<String>,
) -> ApiResult<Json<RestoreResult>> {
    engine
        .restore_snapshot(&name)
        .await
        .map(Json)
        .map_err(engine_error)
}

// ============================================================
// Health & Events
// ============================================================

pub async fn health_summary(State(engine): State<Engine>) -> ApiResult<Json<HealthSummary>> {
    engine.health_summary().map(Json).map_err(engine_error)
}

pub async fn health_report(
    State(engine): State<Engine>,
) -> ApiResult<Json<Vec<HealthRecord>>> {
    engine.health_report().map(Json).map_err(engine_error)
}

/// Query parameters for reading the event log.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Maximum number of events, newest first. Defaults to 50, capped at 500.
    pub limit: Option<u32>,
}

pub async fn recent_events(
    State(engine): State<Engine>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    engine
        .recent_events(query.limit.unwrap_or(DEFAULT_EVENT_LIMIT))
        .map(Json)
        .map_err(engine_error)
}
