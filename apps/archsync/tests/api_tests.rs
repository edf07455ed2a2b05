//! Integration tests for the archsync development server.
//!
//! Uses axum-test to exercise the router without binding a socket.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use archsync::api::{
    AppState, CreateEnvironmentRequest, ErrorBody, HealthResponse, InSyncResponse, SelectVersion,
    create_router,
};
use archsync::config::ServerConfig;
use archsync_core::{
    ApplyRequest, Constraint, DiffStatus, Edge, EnvironmentVersion, InMemoryBackend, Resource,
    ResourceSchema, TopologyDiff, TopologyId,
};
use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use serde_json::json;

const DEV: &str = "/architecture/arch-1/environment/dev";
const PROD: &str = "/architecture/arch-1/environment/prod";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn web() -> TopologyId {
    TopologyId::new("aws", "ec2", "web")
}

fn bucket() -> TopologyId {
    TopologyId::new("aws", "s3", "assets")
}

fn open_config() -> ServerConfig {
    ServerConfig {
        rate_limit: 0,
        ..ServerConfig::default()
    }
}

fn server_with(backend: InMemoryBackend, config: &ServerConfig) -> TestServer {
    TestServer::new(create_router(AppState::new(backend), config)).unwrap()
}

fn create_test_server() -> TestServer {
    server_with(InMemoryBackend::new(), &open_config())
}

fn web_graph(instance_type: &str) -> CreateEnvironmentRequest {
    CreateEnvironmentRequest {
        resources: vec![
            Resource::new(web()).with_property("instanceType", json!(instance_type)),
            Resource::new(bucket()),
        ],
        edges: vec![Edge::new(web(), bucket())],
    }
}

/// dev and prod created from the same graph, both at v1.
async fn create_populated_test_server() -> TestServer {
    let server = create_test_server();
    server.put(DEV).json(&web_graph("t3.medium")).await.assert_status(StatusCode::CREATED);
    server.put(PROD).json(&web_graph("t3.medium")).await.assert_status(StatusCode::CREATED);
    server
}

fn resize(version: u64, expected_head: Option<u64>, instance_type: &str) -> ApplyRequest {
    ApplyRequest {
        version,
        expected_head,
        constraints: vec![Constraint::set_property(web(), "instanceType", json!(instance_type))],
    }
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// ENVIRONMENT ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_create_environment_starts_at_version_one() {
    let server = create_test_server();

    let response = server.put(DEV).json(&web_graph("t3.medium")).await;

    response.assert_status(StatusCode::CREATED);
    let created: EnvironmentVersion = response.json();
    assert_eq!(created.version, 1);
    assert_eq!(created.architecture_id, "arch-1");
    assert_eq!(created.environment_id, "dev");
    assert_eq!(created.resources.len(), 2);
    assert!(created.has_edge(&web(), &bucket()));
}

#[tokio::test]
async fn test_create_environment_twice_is_rejected() {
    let server = create_populated_test_server().await;

    let response = server.put(DEV).json(&web_graph("t3.small")).await;

    response.assert_status_bad_request();
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "bad_request");
}

#[tokio::test]
async fn test_get_environment_defaults_to_current() {
    let server = create_populated_test_server().await;

    let response = server.get(DEV).await;

    response.assert_status_ok();
    let current: EnvironmentVersion = response.json();
    assert_eq!(current.version, 1);
    assert_eq!(
        current.resource(&web()).unwrap().property("instanceType"),
        Some(&json!("t3.medium"))
    );
}

#[tokio::test]
async fn test_get_missing_environment_is_not_found() {
    let server = create_test_server();

    let response = server.get(DEV).await;

    response.assert_status_not_found();
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "not_found");
    assert_eq!(body.architecture.as_deref(), Some("arch-1"));
    assert_eq!(body.environment.as_deref(), Some("dev"));
}

#[tokio::test]
async fn test_get_missing_version_is_not_found() {
    let server = create_populated_test_server().await;

    let response = server.get(DEV).add_query_param("version", 42).await;

    response.assert_status_not_found();
    let body: ErrorBody = response.json();
    assert_eq!(body.version, Some(42));
}

// =============================================================================
// APPLY ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_apply_produces_next_version() {
    let server = create_populated_test_server().await;

    let response = server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(1, Some(1), "t3.large"))
        .await;

    response.assert_status_ok();
    let applied: EnvironmentVersion = response.json();
    assert_eq!(applied.version, 2);
    assert_eq!(
        applied.resource(&web()).unwrap().property("instanceType"),
        Some(&json!("t3.large"))
    );

    let current: EnvironmentVersion = server.get(DEV).await.json();
    assert_eq!(current.version, 2);
}

#[tokio::test]
async fn test_stale_apply_is_conflict() {
    let server = create_populated_test_server().await;
    server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(1, Some(1), "t3.large"))
        .await
        .assert_status_ok();

    // Second client still believes v1 is the newest.
    let response = server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(1, Some(1), "t3.xlarge"))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "stale_version");
    assert_eq!(body.server_version, Some(2));
    assert_eq!(body.client_version, Some(1));
}

#[tokio::test]
async fn test_forced_apply_ignores_newer_versions() {
    let server = create_populated_test_server().await;
    server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(1, Some(1), "t3.large"))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(1, None, "t3.xlarge"))
        .await;

    response.assert_status_ok();
    let applied: EnvironmentVersion = response.json();
    assert_eq!(applied.version, 3);
    assert_eq!(
        applied.resource(&web()).unwrap().property("instanceType"),
        Some(&json!("t3.xlarge"))
    );
}

#[tokio::test]
async fn test_invalid_constraints_are_unprocessable() {
    let server = create_populated_test_server().await;
    let request = ApplyRequest {
        version: 1,
        expected_head: Some(1),
        constraints: vec![Constraint::set_property(
            TopologyId::new("aws", "ec2", "missing"),
            "instanceType",
            json!("t3.large"),
        )],
    };

    let response = server.post(&format!("{DEV}/constraints")).json(&request).await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "config");
    assert_eq!(body.errors.len(), 1);
    assert_eq!(
        body.errors[0].resource,
        Some(TopologyId::new("aws", "ec2", "missing"))
    );
}

#[tokio::test]
async fn test_schema_rejects_unknown_property() {
    let config = open_config();
    let schema = ResourceSchema::new().with_type("ec2", ["instanceType"]);
    let server = server_with(InMemoryBackend::with_schema(schema), &config);
    server.put(DEV).json(&web_graph("t3.medium")).await.assert_status(StatusCode::CREATED);

    let request = ApplyRequest {
        version: 1,
        expected_head: Some(1),
        constraints: vec![Constraint::set_property(web(), "colour", json!("blue"))],
    };
    let response = server.post(&format!("{DEV}/constraints")).json(&request).await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: ErrorBody = response.json();
    assert_eq!(body.errors[0].property.as_deref(), Some("colour"));
}

#[tokio::test]
async fn test_malformed_apply_body_is_rejected() {
    let server = create_populated_test_server().await;

    let response = server
        .post(&format!("{DEV}/constraints"))
        .json(&json!({"version": 1, "constraints": [{"scope": "nowhere"}]}))
        .await;

    assert!(response.status_code().is_client_error());
}

// =============================================================================
// HISTORY ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_next_and_previous_follow_the_parent_chain() {
    let server = create_populated_test_server().await;
    server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(1, Some(1), "t3.large"))
        .await
        .assert_status_ok();

    let next: EnvironmentVersion = server
        .get(&format!("{DEV}/next"))
        .add_query_param("version", 1)
        .await
        .json();
    assert_eq!(next.version, 2);

    let previous: EnvironmentVersion = server
        .get(&format!("{DEV}/previous"))
        .add_query_param("version", 2)
        .await
        .json();
    assert_eq!(previous.version, 1);
}

#[tokio::test]
async fn test_missing_neighbors_are_not_found() {
    let server = create_populated_test_server().await;

    let response = server
        .get(&format!("{DEV}/previous"))
        .add_query_param("version", 1)
        .await;
    response.assert_status_not_found();
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "not_found");
    assert_eq!(body.version, Some(1));

    server
        .get(&format!("{DEV}/next"))
        .add_query_param("version", 1)
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_select_moves_current_version() {
    let server = create_populated_test_server().await;
    server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(1, Some(1), "t3.large"))
        .await
        .assert_status_ok();

    let response = server.post(DEV).json(&SelectVersion { version: 1 }).await;

    response.assert_status_ok();
    let selected: SelectVersion = response.json();
    assert_eq!(selected.version, 1);
    let current: EnvironmentVersion = server.get(DEV).await.json();
    assert_eq!(current.version, 1);
}

#[tokio::test]
async fn test_select_unknown_version_is_not_found() {
    let server = create_populated_test_server().await;

    server
        .post(DEV)
        .json(&SelectVersion { version: 9 })
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_constraints_follow_the_current_chain() {
    let server = create_populated_test_server().await;
    server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(1, Some(1), "t3.large"))
        .await
        .assert_status_ok();
    server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(2, Some(2), "t3.xlarge"))
        .await
        .assert_status_ok();

    let constraints: Vec<Constraint> = server.get(&format!("{DEV}/constraints")).await.json();
    assert_eq!(
        constraints,
        vec![
            Constraint::set_property(web(), "instanceType", json!("t3.large")),
            Constraint::set_property(web(), "instanceType", json!("t3.xlarge")),
        ]
    );
}

// =============================================================================
// SYNC ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_identical_environments_are_in_sync() {
    let server = create_populated_test_server().await;

    let response = server
        .get(&format!("{PROD}/insync"))
        .add_query_param("source", "dev")
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({"inSync": true}));
}

#[tokio::test]
async fn test_diff_reports_changed_properties() {
    let server = create_populated_test_server().await;
    server
        .post(&format!("{DEV}/constraints"))
        .json(&resize(1, Some(1), "t3.large"))
        .await
        .assert_status_ok();

    let diff: TopologyDiff = server
        .get(&format!("{PROD}/diff"))
        .add_query_param("source", "dev")
        .await
        .json();

    let entry = diff.resources.get(&web().to_string()).unwrap();
    assert_eq!(entry.status, DiffStatus::Changed);
    let change = entry.properties.get("instanceType").unwrap();
    assert_eq!(change.old, Some(json!("t3.large")));
    assert_eq!(change.new, Some(json!("t3.medium")));

    let in_sync: InSyncResponse = server
        .get(&format!("{PROD}/insync"))
        .add_query_param("source", "dev")
        .await
        .json();
    assert!(!in_sync.in_sync);
}

#[tokio::test]
async fn test_diff_against_missing_environment_is_not_found() {
    let server = create_populated_test_server().await;

    server
        .get(&format!("{PROD}/diff"))
        .add_query_param("source", "staging")
        .await
        .assert_status_not_found();
}

// =============================================================================
// AUTHENTICATION MIDDLEWARE TESTS
// =============================================================================

fn create_auth_test_server(api_key: &str) -> TestServer {
    let config = ServerConfig {
        api_key: Some(api_key.to_string()),
        ..open_config()
    };
    server_with(InMemoryBackend::new(), &config)
}

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let api_key = "test-secret-key-12345";
    let server = create_auth_test_server(api_key);

    let response = server
        .put(DEV)
        .json(&web_graph("t3.medium"))
        .add_header(
            header::AUTHORIZATION,
            format!("Bearer {}", api_key).parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_auth_missing_header_is_unauthorized() {
    let server = create_auth_test_server("test-secret-key-12345");

    server.get(DEV).await.assert_status_unauthorized();
}

#[tokio::test]
async fn test_auth_wrong_key_is_unauthorized() {
    let server = create_auth_test_server("test-secret-key-12345");

    let response = server
        .get(DEV)
        .add_header(
            header::AUTHORIZATION,
            "Bearer wrong-key".parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_auth_health_is_always_open() {
    let server = create_auth_test_server("test-secret-key-12345");

    server.get("/health").await.assert_status_ok();
}

// =============================================================================
// RATE LIMIT TESTS
// =============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_bursts() {
    let config = ServerConfig {
        rate_limit: 1,
        ..ServerConfig::default()
    };
    let server = server_with(InMemoryBackend::new(), &config);

    server.get("/health").await.assert_status_ok();
    server
        .get("/health")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}
