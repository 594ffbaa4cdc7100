//! PostgreSQL catalog implementation.
//!
//! Row locks (`FOR UPDATE`) on `content_records` serialize link attachment
//! against purges, so a hash cannot be retired while a new reference lands.

use crate::error::MetadataResult;
use crate::models::*;
use crate::repos::{AuditRepo, ContentRepo, LinkRepo, ReclaimRepo};
use crate::store::CatalogStore;
use async_trait::async_trait;
use silo_core::LinkStatus;
use silo_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }
        if let Some(pass) = password {
            opts = opts.password(pass);
        }
        if let Some(mode) = ssl_mode {
            opts = opts.ssl_mode(match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            });
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!(timeout_ms, "PostgreSQL statement_timeout set");
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl ContentRepo for PostgresStore {
    async fn upsert_content(&self, record: &ContentRecordRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO content_records
                (hash, canonical_name, size, blob_key, present, created_at, updated_at, removed_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, NULL)
            ON CONFLICT(hash) DO UPDATE SET
                size = EXCLUDED.size,
                blob_key = EXCLUDED.blob_key,
                present = TRUE,
                updated_at = EXCLUDED.updated_at,
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
        let row =
            sqlx::query_as::<_, ContentRecordRow>("SELECT * FROM content_records WHERE hash = $1")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn mark_content_absent(&self, hash: &str, at: OffsetDateTime) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE content_records SET present = FALSE, removed_at = $1, updated_at = $1 WHERE hash = $2 AND present",
        )
        .bind(at)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LinkRepo for PostgresStore {
    async fn attach_link(&self, link: &FileLinkRow) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;

        let present: Option<bool> =
            sqlx::query_scalar("SELECT present FROM content_records WHERE hash = $1 FOR UPDATE")
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
            VALUES ($1, $2, $3, $4, 'active', $5, $6)
            ON CONFLICT(owner, hash) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                size = EXCLUDED.size,
                status = 'active',
                updated_at = EXCLUDED.updated_at
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
            "SELECT * FROM file_links WHERE owner = $1 AND hash = $2",
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

        if to == LinkStatus::Active {
            let present: Option<bool> = sqlx::query_scalar(
                "SELECT present FROM content_records WHERE hash = $1 FOR UPDATE",
            )
            .bind(hash)
            .fetch_optional(&mut *tx)
            .await?;
            if present != Some(true) {
                tx.rollback().await?;
                return Ok(false);
            }
        }

        let result = sqlx::query(
            "UPDATE file_links SET status = $1, updated_at = $2 WHERE owner = $3 AND hash = $4 AND status = $5",
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
        let result = sqlx::query("DELETE FROM file_links WHERE owner = $1 AND hash = $2")
            .bind(owner)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_active_links(&self, hash: &str) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM file_links WHERE hash = $1 AND status = 'active'",
        )
        .bind(hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn list_links(&self, owner: &str, status: LinkStatus) -> MetadataResult<Vec<FileLinkRow>> {
        let rows = sqlx::query_as::<_, FileLinkRow>(
            "SELECT * FROM file_links WHERE owner = $1 AND status = $2 ORDER BY updated_at DESC, hash",
        )
        .bind(owner)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AuditRepo for PostgresStore {
    async fn insert_audit_event(&self, event: &AuditEventRow) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_events
                (event_id, actor, operation, resource_type, resource_id, outcome, error_message, extra, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
            "SELECT * FROM audit_events WHERE actor = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(actor)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ReclaimRepo for PostgresStore {
    async fn purge_unreferenced(
        &self,
        hash: &str,
        cutoff: OffsetDateTime,
        at: OffsetDateTime,
    ) -> MetadataResult<PurgeOutcome> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, ContentRecordRow>(
            "SELECT * FROM content_records WHERE hash = $1 FOR UPDATE",
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
            "SELECT COUNT(*) FROM file_links WHERE hash = $1 AND status = 'active'",
        )
        .bind(hash)
        .fetch_one(&mut *tx)
        .await?;
        if active > 0 {
            tx.rollback().await?;
            return Ok(PurgeOutcome::StillReferenced);
        }

        let in_grace: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM file_links WHERE hash = $1 AND status = 'recycled' AND updated_at > $2",
        )
        .bind(hash)
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await?;
        if in_grace > 0 {
            tx.rollback().await?;
            return Ok(PurgeOutcome::GracePending);
        }

        sqlx::query("DELETE FROM file_links WHERE hash = $1 AND status = 'recycled'")
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE content_records SET present = FALSE, removed_at = $1, updated_at = $1 WHERE hash = $2",
        )
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
            WHERE c.present
              AND NOT EXISTS (
                SELECT 1 FROM file_links l
                WHERE l.hash = c.hash AND l.status = 'active'
              )
              AND COALESCE(
                (SELECT MAX(l2.updated_at) FROM file_links l2 WHERE l2.hash = c.hash),
                c.updated_at
              ) < $1
            ORDER BY c.updated_at
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
