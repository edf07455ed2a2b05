//! # API Endpoint Handlers
//!
//! Thin wrappers over `InMemoryBackend`: extract, call, map errors.

use super::{
    AppState,
    types::{
        CreateEnvironmentRequest, ErrorBody, HealthResponse, InSyncResponse, NeighborQuery,
        SelectVersion, SourceQuery, VersionQuery,
    },
};
use archsync_core::{
    ApplyRequest, ArchsyncError, Constraint, Direction, EnvironmentKey, EnvironmentVersion,
    TopologyDiff,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// `(architecture_id, environment_id)` path segments.
type EnvironmentPath = Path<(String, String)>;

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// An engine error rendered as a JSON error response.
#[derive(Debug)]
pub struct ApiError(pub ArchsyncError);

impl From<ArchsyncError> for ApiError {
    fn from(err: ArchsyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = ErrorBody::from_error(&self.0);
        if status.is_server_error() {
            tracing::error!("{}", self.0);
        } else {
            tracing::debug!(status = status.as_u16(), "{}", self.0);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// ENVIRONMENT HANDLERS
// =============================================================================

/// `GET .../environment/{env}[?version=N]`
pub async fn get_environment_handler(
    State(state): State<AppState>,
    Path((architecture_id, environment_id)): EnvironmentPath,
    Query(query): Query<VersionQuery>,
) -> ApiResult<EnvironmentVersion> {
    let key = EnvironmentKey::new(architecture_id, environment_id);
    let version = state.backend.get(&key, query.version)?;
    Ok(Json(version.as_ref().clone()))
}

/// `PUT .../environment/{env}`: create the environment at version 1.
pub async fn create_environment_handler(
    State(state): State<AppState>,
    Path((architecture_id, environment_id)): EnvironmentPath,
    Json(request): Json<CreateEnvironmentRequest>,
) -> Result<(StatusCode, Json<EnvironmentVersion>), ApiError> {
    let key = EnvironmentKey::new(architecture_id, environment_id);
    let created = state
        .backend
        .create_environment(&key, request.resources, request.edges)?;
    tracing::info!("Created {} with {} resources", key, created.resources.len());
    Ok((StatusCode::CREATED, Json(created.as_ref().clone())))
}

/// `POST .../environment/{env}`: move the current pointer.
pub async fn select_handler(
    State(state): State<AppState>,
    Path((architecture_id, environment_id)): EnvironmentPath,
    Json(request): Json<SelectVersion>,
) -> ApiResult<SelectVersion> {
    let key = EnvironmentKey::new(architecture_id, environment_id);
    let version = state.backend.set_current(&key, request.version)?;
    tracing::info!("Selected {} v{}", key, version);
    Ok(Json(SelectVersion { version }))
}

// =============================================================================
// HISTORY HANDLERS
// =============================================================================

/// `GET .../next?version=N`
pub async fn next_handler(
    state: State<AppState>,
    path: EnvironmentPath,
    query: Query<NeighborQuery>,
) -> Response {
    neighbor(state, path, query, Direction::Next)
}

/// `GET .../previous?version=N`
pub async fn previous_handler(
    state: State<AppState>,
    path: EnvironmentPath,
    query: Query<NeighborQuery>,
) -> Response {
    neighbor(state, path, query, Direction::Previous)
}

fn neighbor(
    State(state): State<AppState>,
    Path((architecture_id, environment_id)): EnvironmentPath,
    Query(query): Query<NeighborQuery>,
    direction: Direction,
) -> Response {
    let key = EnvironmentKey::new(architecture_id, environment_id);
    let found = state
        .backend
        .neighbor_of(&key, query.version, direction)
        .and_then(|n| n.map(|n| state.backend.get(&key, Some(n))).transpose());

    match found {
        Ok(Some(version)) => Json(version.as_ref().clone()).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::no_neighbor(&key, query.version, direction)),
        )
            .into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

// =============================================================================
// CONSTRAINT HANDLERS
// =============================================================================

/// `POST .../constraints`: solve a batch into a new version.
pub async fn apply_handler(
    State(state): State<AppState>,
    Path((architecture_id, environment_id)): EnvironmentPath,
    Json(request): Json<ApplyRequest>,
) -> ApiResult<EnvironmentVersion> {
    let key = EnvironmentKey::new(architecture_id, environment_id);
    match state.backend.submit(&key, &request) {
        Ok(version) => {
            tracing::info!(
                "Applied {} constraint(s) to {} v{} -> v{}",
                request.constraints.len(),
                key,
                request.version,
                version.version
            );
            Ok(Json(version.as_ref().clone()))
        }
        Err(err @ ArchsyncError::StaleVersion { .. }) => {
            tracing::warn!("Rejected stale apply to {}: {}", key, err);
            Err(ApiError(err))
        }
        Err(err) => Err(ApiError(err)),
    }
}

/// `GET .../constraints`
pub async fn constraints_handler(
    State(state): State<AppState>,
    Path((architecture_id, environment_id)): EnvironmentPath,
) -> ApiResult<Vec<Constraint>> {
    let key = EnvironmentKey::new(architecture_id, environment_id);
    Ok(Json(state.backend.history_constraints(&key)?))
}

// =============================================================================
// SYNC HANDLERS
// =============================================================================

/// `GET .../{target}/diff?source=S`
pub async fn diff_handler(
    State(state): State<AppState>,
    Path((architecture_id, target)): EnvironmentPath,
    Query(query): Query<SourceQuery>,
) -> ApiResult<TopologyDiff> {
    let diff = state
        .backend
        .diff_environments(&architecture_id, &query.source, &target)?;
    Ok(Json(diff))
}

/// `GET .../{target}/insync?source=S`
pub async fn insync_handler(
    State(state): State<AppState>,
    Path((architecture_id, target)): EnvironmentPath,
    Query(query): Query<SourceQuery>,
) -> ApiResult<InSyncResponse> {
    let diff = state
        .backend
        .diff_environments(&architecture_id, &query.source, &target)?;
    Ok(Json(InSyncResponse {
        in_sync: diff.is_empty(),
    }))
}
