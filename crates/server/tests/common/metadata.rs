//! Catalog test utilities.

use silo_metadata::{CatalogStore, MetadataError, MetadataResult, PostgresStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// A SQLite catalog in a temporary directory.
#[allow(dead_code)]
pub struct TestCatalog {
    pub store: Arc<dyn CatalogStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestCatalog {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("catalog.db")).await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }
}

/// A PostgreSQL catalog backed by a testcontainer.
#[allow(dead_code)]
pub struct PostgresTestCatalog {
    pub store: Arc<dyn CatalogStore>,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestCatalog {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Internal(format!("Failed to start PostgreSQL container: {e}"))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
        let store = PostgresStore::from_url(&url, 5, None).await?;

        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }
}

/// Run a test against SQLite, then PostgreSQL when Docker is available and
/// `SKIP_POSTGRES_TESTS` is unset.
#[allow(dead_code)]
pub async fn run_catalog_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn CatalogStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestCatalog::new()
        .await
        .expect("Failed to create SQLite test catalog");
    test_fn.clone()(sqlite.store()).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_err() {
        match PostgresTestCatalog::new().await {
            Ok(postgres) => test_fn(postgres.store()).await,
            Err(err) => eprintln!("Skipping PostgreSQL catalog tests: {err}"),
        }
    }
}
