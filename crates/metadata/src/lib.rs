//! Relational catalog for the silo file store.
//!
//! This crate owns the authoritative state:
//! - Content records, one per distinct hash, with an existence flag
//! - Per-user file links and their active/recycled lifecycle
//! - The persisted operation log
//!
//! Reference counts are derived from active links, never stored.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{AuditEventRow, ContentRecordRow, FileLinkRow, PurgeOutcome};
pub use postgres::PostgresStore;
pub use repos::{AuditRepo, ContentRepo, LinkRepo, ReclaimRepo};
pub use store::{CatalogStore, SqliteStore};

use silo_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a catalog from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn CatalogStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn CatalogStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn CatalogStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("catalog.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert_eq!(store.backend_name(), "sqlite");
        assert!(db_path.exists());
    }
}
