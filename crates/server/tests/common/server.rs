//! Server test utilities.

use crate::common::storage::InstrumentedBlobStore;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use silo_core::config::{AppConfig, MetadataConfig, StorageConfig};
use silo_metadata::{CatalogStore, SqliteStore};
use silo_server::{AppState, Runtime, create_router};
use silo_storage::{BlobStore, FilesystemBackend};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

/// Default identity header.
#[allow(dead_code)]
pub const USER_HEADER: &str = "x-silo-user";

/// A fully wired server over a temporary filesystem blob store and SQLite
/// catalog.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub runtime: Runtime,
    pub blobs: Arc<InstrumentedBlobStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with `AppConfig::for_testing()`.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        silo_server::metrics::register_metrics();
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let backend: Arc<dyn BlobStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );
        let blobs = Arc::new(InstrumentedBlobStore::new(backend));

        let db_path = temp_dir.path().join("catalog.db");
        let catalog: Arc<dyn CatalogStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create catalog"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem { path: storage_path };
        config.metadata = MetadataConfig::Sqlite { path: db_path };
        modifier(&mut config);

        let runtime = Runtime::start(config, blobs.clone(), catalog).await;
        let state = runtime.state.clone();
        let router = create_router(state.clone());

        Self {
            router,
            state,
            runtime,
            blobs,
            _temp_dir: temp_dir,
        }
    }

    pub fn catalog(&self) -> Arc<dyn CatalogStore> {
        self.state.catalog.clone()
    }

    /// Send a request and collect the full response.
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        user: Option<&str>,
        headers: &[(&str, &str)],
        body: Body,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder.body(body).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    /// Send an optional JSON body and parse a JSON response.
    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (headers, body): (&[(&str, &str)], Body) = match body {
            Some(v) => (
                &[("content-type", "application/json")],
                Body::from(serde_json::to_vec(&v).unwrap()),
            ),
            None => (&[], Body::empty()),
        };
        let (status, _, bytes) = self.send(method, uri, user, headers, body).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Single-shot upload through the HTTP surface.
    pub async fn upload(&self, user: &str, file_name: &str, data: Bytes) -> (StatusCode, Value) {
        let (status, _, bytes) = self
            .send(
                "POST",
                "/v1/files",
                Some(user),
                &[("x-file-name", file_name)],
                Body::from(data),
            )
            .await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Poll `check` until it returns true or `timeout` elapses.
    pub async fn eventually<F, Fut>(&self, timeout: Duration, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}
