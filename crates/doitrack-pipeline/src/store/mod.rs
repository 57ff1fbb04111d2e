//! Record persistence
//!
//! Two stores back the pipeline: the citation store holding one
//! [`CitationRecord`] per catalog key, and the externally owned target dataset
//! that the merge stage writes into. Every write is a guarded update that only
//! applies while the record is still in the expected state, which keeps stage
//! transitions forward-only even when a run is repeated.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryCitationStore, MemoryTargetStore};
pub use postgres::{PgCitationStore, PgTargetStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use doitrack_common::{CitationRecord, RecordStatus, StatusCounts, TargetRecord};
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Record {key} violates store invariant: {reason}")]
    InvariantViolation { key: String, reason: String },

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Selection over citation records by derived status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationQuery {
    pub status: RecordStatus,
    /// Only records created at or before this instant
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl CitationQuery {
    pub fn for_status(status: RecordStatus) -> Self {
        Self {
            status,
            created_before: None,
            limit: None,
        }
    }

    pub fn created_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.created_before = Some(cutoff);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &CitationRecord) -> bool {
        record.status() == self.status
            && self
                .created_before
                .map_or(true, |cutoff| record.created_at <= cutoff)
    }
}

#[async_trait]
pub trait CitationStore: Send + Sync {
    /// Insert a new record. Returns `false` if the key already exists, in
    /// which case the stored record is left untouched.
    async fn insert(&self, record: &CitationRecord) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<CitationRecord>>;

    /// Matching records, oldest `updated_at` first
    async fn find(&self, query: &CitationQuery) -> StoreResult<Vec<CitationRecord>>;

    /// Keys of matching records, oldest `updated_at` first
    async fn distinct_keys(&self, query: &CitationQuery) -> StoreResult<Vec<String>>;

    /// Records for the given keys, oldest `updated_at` first. Unknown keys are ignored.
    async fn find_by_keys(&self, keys: &[String]) -> StoreResult<Vec<CitationRecord>>;

    /// Assign an identifier to a record that has none.
    ///
    /// Returns `false` (and writes nothing) if the record is missing or
    /// already has an identifier.
    async fn set_identifier(
        &self,
        key: &str,
        identifier: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Attach citation text to a record that has an identifier and no citation text yet.
    async fn set_citation_text(
        &self,
        key: &str,
        citation_text: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn status_counts(&self) -> StoreResult<StatusCounts>;
}

#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<TargetRecord>>;

    /// Subset of `keys` naming target records with neither merged field set
    async fn unmerged_keys(&self, keys: &[String]) -> StoreResult<Vec<String>>;

    /// Populate both merged fields of an unmerged target.
    ///
    /// Returns `false` if the target does not exist or has already been merged.
    async fn set_merged(
        &self,
        key: &str,
        identifier: &str,
        citation_text: &str,
    ) -> StoreResult<bool>;

    async fn merged_count(&self) -> StoreResult<u64>;
}
