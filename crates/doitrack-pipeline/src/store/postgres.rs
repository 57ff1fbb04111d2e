//! PostgreSQL-backed stores (sqlx)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use doitrack_common::{CitationRecord, RecordStatus, StatusCounts, TargetRecord};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info};

use super::{CitationQuery, CitationStore, StoreResult, TargetStore};
use crate::config::DatabaseConfig;

const CITATION_COLUMNS: &str = "key, identifier, citation_text, created_at, updated_at";

/// Open a connection pool
pub async fn connect(config: &DatabaseConfig) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool ready"
    );
    Ok(pool)
}

/// Apply pending migrations from the workspace `migrations/` directory
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

#[derive(Debug, FromRow)]
struct CitationRow {
    key: String,
    identifier: Option<String>,
    citation_text: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CitationRow> for CitationRecord {
    fn from(row: CitationRow) -> Self {
        CitationRecord {
            key: row.key,
            identifier: row.identifier,
            citation_text: row.citation_text,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TargetRow {
    key: String,
    merged_identifier: Option<String>,
    merged_citation_text: Option<String>,
}

impl From<TargetRow> for TargetRecord {
    fn from(row: TargetRow) -> Self {
        TargetRecord {
            key: row.key,
            merged_identifier: row.merged_identifier,
            merged_citation_text: row.merged_citation_text,
        }
    }
}

fn status_predicate(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Pending => "identifier IS NULL",
        RecordStatus::IdentifierAssigned => "identifier IS NOT NULL AND citation_text IS NULL",
        RecordStatus::CitationReady => "identifier IS NOT NULL AND citation_text IS NOT NULL",
    }
}

/// `SELECT <columns> ... WHERE <status> [AND created_at <= $n] ORDER BY ... [LIMIT $m]`
fn selection<'a>(columns: &str, query: &'a CitationQuery) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {} FROM citation_records WHERE {}",
        columns,
        status_predicate(query.status)
    ));

    if let Some(cutoff) = query.created_before {
        builder.push(" AND created_at <= ").push_bind(cutoff);
    }

    builder.push(" ORDER BY updated_at ASC, key ASC");

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ").push_bind(limit.max(0));
    }

    builder
}

#[derive(Clone)]
pub struct PgCitationStore {
    pool: PgPool,
}

impl PgCitationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CitationStore for PgCitationStore {
    async fn insert(&self, record: &CitationRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO citation_records (key, identifier, citation_text, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&record.key)
        .bind(&record.identifier)
        .bind(&record.citation_text)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<CitationRecord>> {
        let row = sqlx::query_as::<_, CitationRow>(&format!(
            "SELECT {} FROM citation_records WHERE key = $1",
            CITATION_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find(&self, query: &CitationQuery) -> StoreResult<Vec<CitationRecord>> {
        let rows = selection(CITATION_COLUMNS, query)
            .build_query_as::<CitationRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn distinct_keys(&self, query: &CitationQuery) -> StoreResult<Vec<String>> {
        let keys = selection("key", query)
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;

        Ok(keys)
    }

    async fn find_by_keys(&self, keys: &[String]) -> StoreResult<Vec<CitationRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, CitationRow>(&format!(
            "SELECT {} FROM citation_records WHERE key = ANY($1) ORDER BY updated_at ASC, key ASC",
            CITATION_COLUMNS
        ))
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_identifier(
        &self,
        key: &str,
        identifier: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE citation_records
            SET identifier = $2, updated_at = GREATEST(updated_at, $3)
            WHERE key = $1 AND identifier IS NULL
            "#,
        )
        .bind(key)
        .bind(identifier)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_citation_text(
        &self,
        key: &str,
        citation_text: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE citation_records
            SET citation_text = $2, updated_at = GREATEST(updated_at, $3)
            WHERE key = $1 AND identifier IS NOT NULL AND citation_text IS NULL
            "#,
        )
        .bind(key)
        .bind(citation_text)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        let (pending, identifier_assigned, citation_ready): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE identifier IS NULL),
                COUNT(*) FILTER (WHERE identifier IS NOT NULL AND citation_text IS NULL),
                COUNT(*) FILTER (WHERE identifier IS NOT NULL AND citation_text IS NOT NULL)
            FROM citation_records
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StatusCounts {
            pending: count(pending),
            identifier_assigned: count(identifier_assigned),
            citation_ready: count(citation_ready),
        })
    }
}

#[derive(Clone)]
pub struct PgTargetStore {
    pool: PgPool,
}

impl PgTargetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TargetStore for PgTargetStore {
    async fn get(&self, key: &str) -> StoreResult<Option<TargetRecord>> {
        let row = sqlx::query_as::<_, TargetRow>(
            "SELECT key, merged_identifier, merged_citation_text FROM target_records WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn unmerged_keys(&self, keys: &[String]) -> StoreResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let unmerged = sqlx::query_scalar::<_, String>(
            r#"
            SELECT key FROM target_records
            WHERE key = ANY($1)
              AND merged_identifier IS NULL
              AND merged_citation_text IS NULL
            ORDER BY key
            "#,
        )
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        Ok(unmerged)
    }

    async fn set_merged(
        &self,
        key: &str,
        identifier: &str,
        citation_text: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE target_records
            SET merged_identifier = $2, merged_citation_text = $3
            WHERE key = $1 AND merged_identifier IS NULL AND merged_citation_text IS NULL
            "#,
        )
        .bind(key)
        .bind(identifier)
        .bind(citation_text)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn merged_count(&self) -> StoreResult<u64> {
        let merged: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM target_records
            WHERE merged_identifier IS NOT NULL OR merged_citation_text IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count(merged))
    }
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
