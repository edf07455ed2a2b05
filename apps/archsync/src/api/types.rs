//! # API Request/Response Types
//!
//! JSON shapes shared by the development server and `HttpBackend`.
//! Engine types (`EnvironmentVersion`, `Constraint`, `TopologyDiff`,
//! `ApplyRequest`) travel as-is.

use archsync_core::{ArchsyncError, ConfigError, Direction, Edge, EnvironmentKey, Resource};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// QUERY PARAMETERS
// =============================================================================

/// `?version=N`; absent means the environment's current version.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VersionQuery {
    pub version: Option<u64>,
}

/// `?version=N` where the version is mandatory (neighbor lookups).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NeighborQuery {
    pub version: u64,
}

/// `?source=S` for diff and in-sync checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceQuery {
    pub source: String,
}

// =============================================================================
// BODIES
// =============================================================================

/// Body of `POST .../environment/{env}` and of its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectVersion {
    pub version: u64,
}

/// Response of the in-sync check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InSyncResponse {
    #[serde(rename = "inSync")]
    pub in_sync: bool,
}

/// Body of `PUT .../environment/{env}`: the graph of version 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateEnvironmentRequest {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

// =============================================================================
// ERROR BODY
// =============================================================================

/// Machine-readable failure body.
///
/// `error` is one of `not_found`, `stale_version`, `config`, `bad_request`
/// or `internal`; the remaining fields are present when they apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ConfigError>,
}

impl ErrorBody {
    fn new(error: &str, message: String) -> Self {
        Self {
            error: error.to_string(),
            message,
            architecture: None,
            environment: None,
            version: None,
            server_version: None,
            client_version: None,
            errors: Vec::new(),
        }
    }

    /// The status code and body the server answers with for `err`.
    #[must_use]
    pub fn from_error(err: &ArchsyncError) -> (StatusCode, Self) {
        let message = err.to_string();
        match err {
            ArchsyncError::NotFound {
                architecture,
                environment,
                version,
            } => (
                StatusCode::NOT_FOUND,
                Self {
                    architecture: Some(architecture.clone()),
                    environment: Some(environment.clone()),
                    version: *version,
                    ..Self::new("not_found", message)
                },
            ),
            ArchsyncError::StaleVersion { local, remote } => (
                StatusCode::CONFLICT,
                Self {
                    server_version: Some(*remote),
                    client_version: Some(*local),
                    ..Self::new("stale_version", message)
                },
            ),
            ArchsyncError::Config(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Self {
                    errors: errors.clone(),
                    ..Self::new("config", message)
                },
            ),
            ArchsyncError::Transport(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Self::new("internal", message),
            ),
            _ => (StatusCode::BAD_REQUEST, Self::new("bad_request", message)),
        }
    }

    /// 404 body for a neighbor lookup that found nothing.
    #[must_use]
    pub fn no_neighbor(key: &EnvironmentKey, version: u64, direction: Direction) -> Self {
        Self {
            architecture: Some(key.architecture_id.clone()),
            environment: Some(key.environment_id.clone()),
            version: Some(version),
            ..Self::new(
                "not_found",
                format!("{key} v{version} has no {} version", direction.as_str()),
            )
        }
    }

    /// Rebuild the engine error on the client side.
    #[must_use]
    pub fn into_error(self, status: StatusCode) -> ArchsyncError {
        match (status, self.error.as_str()) {
            (StatusCode::NOT_FOUND, _) => ArchsyncError::NotFound {
                architecture: self.architecture.unwrap_or_default(),
                environment: self.environment.unwrap_or_default(),
                version: self.version,
            },
            (StatusCode::CONFLICT, "stale_version") => match self.server_version {
                Some(remote) => ArchsyncError::StaleVersion {
                    local: self.client_version.unwrap_or_default(),
                    remote,
                },
                None => ArchsyncError::Transport(format!("409 without server_version: {}", self.message)),
            },
            (StatusCode::UNPROCESSABLE_ENTITY, _) if !self.errors.is_empty() => {
                ArchsyncError::Config(self.errors)
            }
            _ => ArchsyncError::Transport(format!("{status}: {}", self.message)),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
