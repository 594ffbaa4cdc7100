//! Catalog store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::repos::{AuditRepo, ContentRepo, LinkRepo, ReclaimRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined catalog trait.
#[async_trait]
pub trait CatalogStore: ContentRepo + LinkRepo + AuditRepo + ReclaimRepo + Send + Sync {
    /// Create tables and indexes if missing.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Name of the backing database, for logs and health output.
    fn backend_name(&self) -> &'static str;
}

/// SQLite-based catalog.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection: transactions are serialized, which is what makes
        // attach_link and purge_unreferenced mutually exclusive here.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "opened sqlite catalog");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use silo_core::LinkStatus;
    use time::OffsetDateTime;

    #[async_trait]
    impl ContentRepo for SqliteStore {
        async fn upsert_content(&self, record: &ContentRecordRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO content_records
                    (hash, canonical_name, size, blob_key, present, created_at, updated_at, removed_at)
                VALUES (?, ?, ?, ?, 1, ?, ?, NULL)
                ON CONFLICT(hash) DO UPDATE SET
                    size = excluded.size,
                    blob_key = excluded.blob_key,
                    present = 1,
                    updated_at = excluded.updated_at,
                    removed_at = NULL
                "#,
            )
            .bind(&record.hash)
            .bind(&record.canonical_name)
            .bind(record.size)
            .bind(&record.blob_key)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_content(&self, hash: &str) -> MetadataResult<Option<ContentRecordRow>> {
            let row = sqlx::query_as::<_, ContentRecordRow>(
                "SELECT * FROM content_records WHERE hash = ?",
            )
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn mark_content_absent(
            &self,
            hash: &str,
            at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE content_records SET present = 0, removed_at = ?, updated_at = ? WHERE hash = ? AND present = 1",
            )
            .bind(at)
            .bind(at)
            .bind(hash)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl LinkRepo for SqliteStore {
        async fn attach_link(&self, link: &FileLinkRow) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let present: Option<bool> =
                sqlx::query_scalar("SELECT present FROM content_records WHERE hash = ?")
                    .bind(&link.hash)
                    .fetch_optional(&mut *tx)
                    .await?;
            if present != Some(true) {
                tx.rollback().await?;
                return Ok(false);
            }

            sqlx::query(
                r#"
                INSERT INTO file_links (owner, hash, display_name, size, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, 'active', ?, ?)
                ON CONFLICT(owner, hash) DO UPDATE SET
                    display_name = excluded.display_name,
                    size = excluded.size,
                    status = 'active',
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&link.owner)
            .bind(&link.hash)
            .bind(&link.display_name)
            .bind(link.size)
            .bind(link.created_at)
            .bind(link.updated_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(true)
        }

        async fn get_link(&self, owner: &str, hash: &str) -> MetadataResult<Option<FileLinkRow>> {
            let row = sqlx::query_as::<_, FileLinkRow>(
                "SELECT * FROM file_links WHERE owner = ? AND hash = ?",
            )
            .bind(owner)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn transition_link(
            &self,
            owner: &str,
            hash: &str,
            from: LinkStatus,
            to: LinkStatus,
            at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            // Re-activation needs live content, same as attach_link.
            if to == LinkStatus::Active {
                let present: Option<bool> =
                    sqlx::query_scalar("SELECT present FROM content_records WHERE hash = ?")
                        .bind(hash)
                        .fetch_optional(&mut *tx)
                        .await?;
                if present != Some(true) {
                    tx.rollback().await?;
                    return Ok(false);
                }
            }

            let result = sqlx::query(
                "UPDATE file_links SET status = ?, updated_at = ? WHERE owner = ? AND hash = ? AND status = ?",
            )
            .bind(to.as_str())
            .bind(at)
            .bind(owner)
            .bind(hash)
            .bind(from.as_str())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_link(&self, owner: &str, hash: &str) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM file_links WHERE owner = ? AND hash = ?")
                .bind(owner)
                .bind(hash)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn count_active_links(&self, hash: &str) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM file_links WHERE hash = ? AND status = 'active'",
            )
            .bind(hash)
            .fetch_one(&self.pool)
            .await?;
            Ok(count as u64)
        }

        async fn list_links(
            &self,
            owner: &str,
            status: LinkStatus,
        ) -> MetadataResult<Vec<FileLinkRow>> {
            let rows = sqlx::query_as::<_, FileLinkRow>(
                "SELECT * FROM file_links WHERE owner = ? AND status = ? ORDER BY updated_at DESC, hash",
            )
            .bind(owner)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl AuditRepo for SqliteStore {
        async fn insert_audit_event(&self, event: &AuditEventRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_events
                    (event_id, actor, operation, resource_type, resource_id, outcome, error_message, extra, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(event_id) DO NOTHING
                "#,
            )
            .bind(event.event_id)
            .bind(&event.actor)
            .bind(&event.operation)
            .bind(&event.resource_type)
            .bind(&event.resource_id)
            .bind(&event.outcome)
            .bind(&event.error_message)
            .bind(&event.extra)
            .bind(event.created_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn recent_audit_events(
            &self,
            actor: &str,
            limit: u32,
        ) -> MetadataResult<Vec<AuditEventRow>> {
            let rows = sqlx::query_as::<_, AuditEventRow>(
                "SELECT * FROM audit_events WHERE actor = ? ORDER BY created_at DESC LIMIT ?",
            )
            .bind(actor)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ReclaimRepo for SqliteStore {
        async fn purge_unreferenced(
            &self,
            hash: &str,
            cutoff: OffsetDateTime,
            at: OffsetDateTime,
        ) -> MetadataResult<PurgeOutcome> {
            let mut tx = self.pool.begin().await?;

            let record = sqlx::query_as::<_, ContentRecordRow>(
                "SELECT * FROM content_records WHERE hash = ?",
            )
            .bind(hash)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(record) = record else {
                tx.rollback().await?;
                return Ok(PurgeOutcome::Missing);
            };
            if !record.present {
                tx.rollback().await?;
                return Ok(PurgeOutcome::AlreadyAbsent {
                    blob_key: record.blob_key,
                });
            }

            let active: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM file_links WHERE hash = ? AND status = 'active'",
            )
            .bind(hash)
            .fetch_one(&mut *tx)
            .await?;
            if active > 0 {
                tx.rollback().await?;
                return Ok(PurgeOutcome::StillReferenced);
            }

            // stored timestamps vary in fractional digits, so compare as numbers
            let in_grace: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM file_links
                WHERE hash = ? AND status = 'recycled'
                  AND julianday(updated_at) > julianday(?)
                "#,
            )
            .bind(hash)
            .bind(cutoff)
            .fetch_one(&mut *tx)
            .await?;
            if in_grace > 0 {
                tx.rollback().await?;
                return Ok(PurgeOutcome::GracePending);
            }

            sqlx::query("DELETE FROM file_links WHERE hash = ? AND status = 'recycled'")
                .bind(hash)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "UPDATE content_records SET present = 0, removed_at = ?, updated_at = ? WHERE hash = ?",
            )
            .bind(at)
            .bind(at)
            .bind(hash)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(PurgeOutcome::Purged {
                blob_key: record.blob_key,
            })
        }

        async fn unreferenced_since(
            &self,
            cutoff: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<ContentRecordRow>> {
            let rows = sqlx::query_as::<_, ContentRecordRow>(
                r#"
                SELECT c.* FROM content_records c
                WHERE c.present = 1
                  AND NOT EXISTS (
                    SELECT 1 FROM file_links l
                    WHERE l.hash = c.hash AND l.status = 'active'
                  )
                  AND COALESCE(
                    (SELECT MAX(julianday(l2.updated_at)) FROM file_links l2 WHERE l2.hash = c.hash),
                    julianday(c.updated_at)
                  ) < julianday(?)
                ORDER BY c.updated_at
                LIMIT ?
                "#,
            )
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- One row per distinct content hash
CREATE TABLE IF NOT EXISTS content_records (
    hash TEXT PRIMARY KEY,
    canonical_name TEXT NOT NULL,
    size INTEGER NOT NULL,
    blob_key TEXT NOT NULL,
    present INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    removed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_content_records_present ON content_records(present, updated_at);

-- Per-user ownership links
CREATE TABLE IF NOT EXISTS file_links (
    owner TEXT NOT NULL,
    hash TEXT NOT NULL REFERENCES content_records(hash),
    display_name TEXT NOT NULL,
    size INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('active', 'recycled')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (owner, hash)
);
CREATE INDEX IF NOT EXISTS idx_file_links_hash_status ON file_links(hash, status);
CREATE INDEX IF NOT EXISTS idx_file_links_owner_status ON file_links(owner, status, updated_at);

-- Operation log
CREATE TABLE IF NOT EXISTS audit_events (
    event_id BLOB PRIMARY KEY,
    actor TEXT NOT NULL,
    operation TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    error_message TEXT,
    extra TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_events_actor ON audit_events(actor, created_at);
"#;
