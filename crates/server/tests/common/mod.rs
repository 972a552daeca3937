//! Common test utilities for in-process API testing.
//!
//! This module provides a test fixture that builds the full router on top of
//! a real `CatalogService` whose upstream is a scripted `MockUpstream`, so
//! sync and read paths can be exercised without a provider.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use reelsync_core::{
    load_config_from_str, testing::MockUpstream, CatalogService, SyncMode, SyncReport,
    TriggerOutcome,
};
use reelsync_server::{create_router, AppState};

/// Re-export fixtures for test convenience
pub use reelsync_core::testing::fixtures;

/// Test fixture for API testing with a mock upstream.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_search() {
///     let fixture = TestFixture::new().await;
///     fixture.upstream.set_pages("/items", vec![vec![fixtures::catalog_item("dune", 1)]]).await;
///     fixture.sync(SyncMode::Full).await;
///
///     let response = fixture.get("/api/v1/catalog/search?q=dune").await;
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Scripted upstream feed
    pub upstream: Arc<MockUpstream>,
    /// The engine behind the router
    pub service: Arc<CatalogService>,
    /// Temporary directory for the database and snapshots
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a started fixture with an empty catalog and scheduled syncs off.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let toml = format!(
            r#"
[server]
host = "127.0.0.1"
port = 8080

[database]
path = "{db}"

[upstream]
base_url = "http://upstream.test"

[upstream.extra_params]
api_key = "test-secret"

[sync]
retry_backoff_ms = 1

[scheduler]
enabled = false

[persistence]
dir = "{dir}"
"#,
            db = temp_dir.path().join("test.db").display(),
            dir = temp_dir.path().join("snapshots").display(),
        );
        let config = load_config_from_str(&toml).expect("Failed to parse test config");

        let upstream = Arc::new(MockUpstream::new());
        let service = Arc::new(
            CatalogService::open_with_client(&config, upstream.clone())
                .expect("Failed to open catalog service"),
        );
        service.start().await;

        let state = Arc::new(AppState::new(config, Arc::clone(&service)));
        let router = create_router(state);

        Self {
            router,
            upstream,
            service,
            temp_dir,
        }
    }

    /// Run a sync to completion directly through the service.
    pub async fn sync(&self, mode: SyncMode) -> SyncReport {
        match self.service.trigger_sync(mode) {
            TriggerOutcome::Started(handle) => handle.wait().await.expect("Sync failed"),
            TriggerOutcome::AlreadyRunning(run) => panic!("Sync already running: {:?}", run),
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a GET request and return the raw text body.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
