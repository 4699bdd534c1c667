//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with a mock registration authority and landing page probe, backed by a
//! transaction log in a temporary directory.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use registrar_core::{
    config::{
        AuthorityConfig, BatchConfig, DatabaseConfig, LifecycleConfig, ReconcilerConfig,
        ServerConfig, ValidatorConfig,
    },
    testing::{MockLandingPageProbe, MockRegistrationAuthority},
    Config, SqliteTransactionLog,
};
use registrar_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use registrar_core::testing::fixtures;

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_draft() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/v1/dois", json!({
///         "mode": "draft",
///         "record": { "key": "urn:x:1", "title": "T", "node": "eng" }
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Shared state behind the router
    pub state: Arc<AppState>,
    /// Mock authority - control receipts and remote status
    pub authority: Arc<MockRegistrationAuthority>,
    /// Mock probe - make landing pages unreachable
    pub probe: Arc<MockLandingPageProbe>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with default mocks.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let authority = Arc::new(MockRegistrationAuthority::new());
        let probe = Arc::new(MockLandingPageProbe::new());

        let config = Config {
            authority: AuthorityConfig {
                url: "http://127.0.0.1:9/".to_string(),
                username: "tester".to_string(),
                password: "secret".to_string(),
                timeout_secs: 5,
            },
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            validator: ValidatorConfig::default(),
            lifecycle: LifecycleConfig::default(),
            batch: BatchConfig::default(),
            reconciler: ReconcilerConfig {
                enabled: false,
                ..Default::default()
            },
        };

        let log = Arc::new(
            SqliteTransactionLog::new(&db_path).expect("Failed to create transaction log"),
        );

        let state = Arc::new(AppState::new(
            config,
            log,
            Arc::clone(&authority) as Arc<dyn registrar_core::RegistrationAuthority>,
            Arc::clone(&probe) as Arc<dyn registrar_core::validator::LandingPageProbe>,
        ));

        let router = create_router(Arc::clone(&state));

        Self {
            router,
            state,
            authority,
            probe,
            temp_dir,
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

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Get the raw text body of a GET request (for non-JSON endpoints).
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, String::from_utf8_lossy(&bytes).to_string())
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

/// JSON body for a record that passes the full rule set against the mock probe.
pub fn record_json(key: &str) -> Value {
    serde_json::to_value(fixtures::doi_request(key)).expect("Failed to serialize request")
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
