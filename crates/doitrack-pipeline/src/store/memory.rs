//! In-memory stores for tests and local dry runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use doitrack_common::{CitationRecord, StatusCounts, TargetRecord};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

use super::{CitationQuery, CitationStore, StoreError, StoreResult, TargetStore};

#[derive(Debug, Default)]
pub struct MemoryCitationStore {
    records: RwLock<BTreeMap<String, CitationRecord>>,
}

impl MemoryCitationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store, replacing records with the same key
    pub async fn with_records(records: impl IntoIterator<Item = CitationRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write().await;
            for record in records {
                map.insert(record.key.clone(), record);
            }
        }
        store
    }

    pub async fn snapshot(&self) -> Vec<CitationRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

/// Sort by `updated_at`, then key for a stable order among equal timestamps
fn oldest_first(records: &mut [CitationRecord]) {
    records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.key.cmp(&b.key)));
}

#[async_trait]
impl CitationStore for MemoryCitationStore {
    async fn insert(&self, record: &CitationRecord) -> StoreResult<bool> {
        if !record.is_consistent() {
            return Err(StoreError::InvariantViolation {
                key: record.key.clone(),
                reason: "citation text without identifier".to_string(),
            });
        }

        let mut map = self.records.write().await;
        if map.contains_key(&record.key) {
            return Ok(false);
        }
        map.insert(record.key.clone(), record.clone());
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<CitationRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn find(&self, query: &CitationQuery) -> StoreResult<Vec<CitationRecord>> {
        let mut matched: Vec<CitationRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        oldest_first(&mut matched);

        if let Some(limit) = query.limit {
            matched.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        }
        Ok(matched)
    }

    async fn distinct_keys(&self, query: &CitationQuery) -> StoreResult<Vec<String>> {
        Ok(self.find(query).await?.into_iter().map(|r| r.key).collect())
    }

    async fn find_by_keys(&self, keys: &[String]) -> StoreResult<Vec<CitationRecord>> {
        let map = self.records.read().await;
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut matched: Vec<CitationRecord> = wanted
            .into_iter()
            .filter_map(|key| map.get(key).cloned())
            .collect();
        oldest_first(&mut matched);
        Ok(matched)
    }

    async fn set_identifier(
        &self,
        key: &str,
        identifier: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut map = self.records.write().await;
        match map.get_mut(key) {
            Some(record) if record.identifier.is_none() => {
                record.identifier = Some(identifier.to_string());
                record.updated_at = record.updated_at.max(at);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn set_citation_text(
        &self,
        key: &str,
        citation_text: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut map = self.records.write().await;
        match map.get_mut(key) {
            Some(record) if record.identifier.is_some() && record.citation_text.is_none() => {
                record.citation_text = Some(citation_text.to_string());
                record.updated_at = record.updated_at.max(at);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for record in self.records.read().await.values() {
            counts.record(record.status());
        }
        Ok(counts)
    }
}

#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    records: RwLock<BTreeMap<String, TargetRecord>>,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_records(records: impl IntoIterator<Item = TargetRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write().await;
            for record in records {
                map.insert(record.key.clone(), record);
            }
        }
        store
    }

    pub async fn snapshot(&self) -> Vec<TargetRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn get(&self, key: &str) -> StoreResult<Option<TargetRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn unmerged_keys(&self, keys: &[String]) -> StoreResult<Vec<String>> {
        let map = self.records.read().await;
        Ok(keys
            .iter()
            .filter(|key| map.get(key.as_str()).is_some_and(|t| !t.is_merged()))
            .cloned()
            .collect())
    }

    async fn set_merged(
        &self,
        key: &str,
        identifier: &str,
        citation_text: &str,
    ) -> StoreResult<bool> {
        let mut map = self.records.write().await;
        match map.get_mut(key) {
            Some(target) if !target.is_merged() => {
                target.merged_identifier = Some(identifier.to_string());
                target.merged_citation_text = Some(citation_text.to_string());
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn merged_count(&self) -> StoreResult<u64> {
        let map = self.records.read().await;
        Ok(map.values().filter(|t| t.is_merged()).count() as u64)
    }
}
