//! # Development Server
//!
//! An axum server implementing the version-store HTTP contract over
//! `archsync_core::InMemoryBackend`. State lives in memory and is lost on
//! restart.
//!
//! ## Endpoints
//!
//! Under `/architecture/{architecture_id}/environment/{environment_id}`:
//!
//! - `GET    ` - Fetch a version (`?version=N`, default current)
//! - `PUT    ` - Create the environment at version 1
//! - `POST   ` - Select a version as current (`{version}`)
//! - `GET    /next?version=N` - Next version (404 when none)
//! - `GET    /previous?version=N` - Previous version (404 when none)
//! - `GET    /constraints` - Constraints behind the current version
//! - `POST   /constraints` - Apply a constraint batch (409 stale, 422 invalid)
//! - `GET    /diff?source=S` - Diff from `S` to this environment
//! - `GET    /insync?source=S` - `{inSync}`
//!
//! Plus `GET /health`, which is never authenticated.

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::ApiKey;
pub use handlers::ApiError;
pub use middleware::{GlobalRateLimiter, create_rate_limiter};
pub use types::{
    CreateEnvironmentRequest, ErrorBody, HealthResponse, InSyncResponse, NeighborQuery,
    SelectVersion, SourceQuery, VersionQuery,
};

use crate::config::ServerConfig;
use archsync_core::{ArchsyncError, EnvironmentVersion, InMemoryBackend};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::get,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Request body limit (2 MB).
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<InMemoryBackend>,
}

impl AppState {
    #[must_use]
    pub fn new(backend: InMemoryBackend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Load seed snapshots (a JSON array of `EnvironmentVersion`).
    pub fn seed(&self, snapshots: Vec<EnvironmentVersion>) -> Result<usize, ArchsyncError> {
        let count = snapshots.len();
        for snapshot in snapshots {
            self.backend.seed(snapshot)?;
        }
        Ok(count)
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

const ALLOWED_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];

/// Build the CORS layer.
///
/// - `None`: localhost only
/// - `["*"]`: every origin
/// - otherwise: the listed origins (invalid entries are skipped)
fn build_cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        Some([wildcard]) if wildcard == "*" => {
            tracing::warn!("CORS: Allowing ALL origins. This is insecure outside development!");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(hv) => {
                        tracing::info!("CORS: Allowing origin: {}", origin);
                        Some(hv)
                    }
                    Err(e) => {
                        tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                        None
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods(ALLOWED_METHODS)
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => build_localhost_cors(),
    }
}

/// Localhost origins only.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing
/// 2. CORS
/// 3. Body limit
/// 4. Rate limiting (if enabled)
/// 5. Authentication (if a key is configured)
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let environment = "/architecture/{architecture_id}/environment/{environment_id}";

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route(
            environment,
            get(handlers::get_environment_handler)
                .post(handlers::select_handler)
                .put(handlers::create_environment_handler),
        )
        .route(&format!("{environment}/next"), get(handlers::next_handler))
        .route(&format!("{environment}/previous"), get(handlers::previous_handler))
        .route(
            &format!("{environment}/constraints"),
            get(handlers::constraints_handler).post(handlers::apply_handler),
        )
        .route(&format!("{environment}/diff"), get(handlers::diff_handler))
        .route(&format!("{environment}/insync"), get(handlers::insync_handler));

    match config.api_key.as_deref().and_then(ApiKey::new) {
        Some(key) => {
            tracing::info!("API key authentication enabled");
            router = router.layer(axum_middleware::from_fn_with_state(
                key,
                auth::api_key_auth_middleware,
            ));
        }
        None => tracing::warn!(
            "API key authentication DISABLED. Set ARCHSYNC_API_KEY to require a bearer key."
        ),
    }

    match create_rate_limiter(config.rate_limit) {
        Some(limiter) => {
            tracing::info!("Rate limiting enabled: {} requests/second", config.rate_limit);
            router = router.layer(axum_middleware::from_fn_with_state(
                limiter,
                middleware::rate_limit_middleware,
            ));
        }
        None => tracing::info!("Rate limiting disabled"),
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(config.cors_origins.as_deref()))
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Bind and serve until the process is stopped.
pub async fn run_server(state: AppState, config: &ServerConfig) -> Result<(), ArchsyncError> {
    let router = create_router(state, config);
    let addr = config.addr();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ArchsyncError::Transport(format!("bind {addr} failed: {e}")))?;

    tracing::info!("archsync development server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| ArchsyncError::Transport(format!("server error: {e}")))
}
