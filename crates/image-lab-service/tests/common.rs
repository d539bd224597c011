//! Common test utilities for image-lab integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tempfile::TempDir;

use image_lab_core::UserId;
use image_lab_service::{create_router, AppState, ServiceConfig};
use image_lab_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const ADMIN_KEY: &str = "test-admin-key";
pub const AUDIENCE: &str = "image-lab";

/// Bytes with a PNG signature.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake image body";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct access to the store behind the server.
    pub store: Arc<MemoryStore>,
    /// Uploads root (kept alive for the test duration).
    pub uploads_dir: TempDir,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Harness with default test configuration.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Harness with configuration adjusted by `customize`.
    pub fn with_config(customize: impl FnOnce(&mut ServiceConfig)) -> Self {
        let uploads_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(MemoryStore::new());

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            uploads_dir: uploads_dir.path().to_path_buf(),
            jwt_secret: Some(JWT_SECRET.into()),
            auth_audience: AUDIENCE.into(),
            admin_api_key: Some(ADMIN_KEY.into()),
            test_mode_allowed: true,
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            ..ServiceConfig::default()
        };
        customize(&mut config);

        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            uploads_dir,
            test_user_id: UserId::generate(),
        }
    }

    /// Authorization header for the test user.
    pub fn user_auth_header(&self) -> String {
        auth_header_for(&self.test_user_id)
    }

    /// Register the test user.
    pub async fn register(&self) {
        self.server
            .post("/v1/users")
            .add_header("authorization", self.user_auth_header())
            .json(&json!({ "email": "tester@example.com" }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
    }

    /// Overwrite the test user's credit state.
    pub async fn set_credits(&self, paid_credits: i64, used_free_credit: bool) {
        self.store
            .update_user_credits(&self.test_user_id, used_free_credit, Some(paid_credits))
            .await
            .expect("Failed to set credits");
    }

    /// Current paid balance of the test user.
    pub async fn paid_credits(&self) -> i64 {
        self.store
            .get_user(&self.test_user_id)
            .await
            .expect("Failed to read user")
            .expect("User missing")
            .paid_credits
    }

    /// Upload a PNG as the test user and return its path.
    pub async fn upload_png(&self) -> String {
        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(PNG_BYTES.to_vec())
                .file_name("product.png")
                .mime_type("image/png"),
        );
        let response = self
            .server
            .post("/v1/uploads")
            .add_header("authorization", self.user_auth_header())
            .multipart(form)
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        let body: serde_json::Value = response.json();
        body["path"].as_str().expect("path missing").to_string()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint a valid JWT for `user_id`.
pub fn token_for(user_id: &UserId) -> String {
    let now = chrono::Utc::now().timestamp();
    encode(
        &Header::default(),
        &json!({
            "sub": user_id.to_string(),
            "aud": AUDIENCE,
            "iat": now,
            "exp": now + 3600,
        }),
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign token")
}

/// Authorization header for `user_id`.
pub fn auth_header_for(user_id: &UserId) -> String {
    format!("Bearer {}", token_for(user_id))
}
