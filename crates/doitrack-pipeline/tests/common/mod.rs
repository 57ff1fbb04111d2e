//! Shared helpers for doitrack-pipeline integration tests
//!
//! - `ScriptedRegistry`: in-process registry double with per-key replies and a call log
//! - `FailingCitationStore`: memory store whose writes fail, for persistence-failure paths
//! - fixtures for clocks, stage configuration and records

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use doitrack_common::{CitationRecord, StatusCounts};
use doitrack_pipeline::config::StageConfig;
use doitrack_pipeline::registry::{
    LookupKey, LookupOutcome, RegistryClient, RegistryError, SubmissionRecord, SubmitResponse,
};
use doitrack_pipeline::stages::Clock;
use doitrack_pipeline::store::{
    CitationQuery, CitationStore, MemoryCitationStore, StoreError, StoreResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Route test logs through the libtest capture
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("doitrack_pipeline=debug")
            .with_test_writer()
            .try_init();
    });
}

pub const SINGLE_ENTRY_PAYLOAD: &str = "@misc{osti_AAA,\n\
    title = {Materials Data on Si by Materials Project},\n\
    author = {The Materials Project},\n\
    doi = {10.17188/AAA},\n\
    year = {2020}\n\
    }\n";

/// Normalized form of [`SINGLE_ENTRY_PAYLOAD`]
pub const SINGLE_ENTRY_NORMALIZED: &str = "@misc{osti_AAA,\n \
    author = {The Materials Project},\n \
    doi = {10.17188/AAA},\n \
    title = {Materials Data on Si by Materials Project},\n \
    year = {2020}\n}\n";

#[derive(Debug, Clone)]
pub enum Reply {
    Found(String),
    Payload(Vec<u8>),
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Lookup(String),
    Citation(String),
}

/// Registry double. Unscripted lookups are not found, unscripted fetches are 404.
#[derive(Default)]
pub struct ScriptedRegistry {
    lookups: Mutex<HashMap<String, Reply>>,
    citations: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_lookup(&self, key: &str, reply: Reply) {
        self.lookups.lock().unwrap().insert(key.to_string(), reply);
    }

    pub fn on_citation(&self, item_id: &str, reply: Reply) {
        self.citations.lock().unwrap().insert(item_id.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn citation_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Citation(id) => Some(id),
                Call::Lookup(_) => None,
            })
            .collect()
    }
}

fn status_error(status: u16) -> RegistryError {
    RegistryError::Status {
        status,
        url: "http://registry.test".to_string(),
    }
}

#[async_trait]
impl RegistryClient for ScriptedRegistry {
    async fn lookup(&self, key: &LookupKey) -> Result<LookupOutcome, RegistryError> {
        let (_, value) = key.query_param();
        self.calls.lock().unwrap().push(Call::Lookup(value.to_string()));
        match self.lookups.lock().unwrap().get(value).cloned() {
            Some(Reply::Found(identifier)) => Ok(LookupOutcome::Found(identifier)),
            Some(Reply::Status(status)) => Err(status_error(status)),
            Some(Reply::Payload(_)) | None => Ok(LookupOutcome::NotFound),
        }
    }

    async fn fetch_citation_text(&self, item_id: &str) -> Result<Vec<u8>, RegistryError> {
        self.calls.lock().unwrap().push(Call::Citation(item_id.to_string()));
        match self.citations.lock().unwrap().get(item_id).cloned() {
            Some(Reply::Payload(bytes)) => Ok(bytes),
            Some(Reply::Status(status)) => Err(status_error(status)),
            Some(Reply::Found(_)) | None => Err(status_error(404)),
        }
    }

    async fn submit(&self, _records: &[SubmissionRecord]) -> Result<SubmitResponse, RegistryError> {
        Ok(SubmitResponse::default())
    }
}

/// Reads from an inner memory store; every write fails
pub struct FailingCitationStore {
    pub inner: MemoryCitationStore,
}

fn backend_down() -> StoreError {
    StoreError::Backend("connection reset".to_string())
}

#[async_trait]
impl CitationStore for FailingCitationStore {
    async fn insert(&self, _record: &CitationRecord) -> StoreResult<bool> {
        Err(backend_down())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<CitationRecord>> {
        self.inner.get(key).await
    }

    async fn find(&self, query: &CitationQuery) -> StoreResult<Vec<CitationRecord>> {
        self.inner.find(query).await
    }

    async fn distinct_keys(&self, query: &CitationQuery) -> StoreResult<Vec<String>> {
        self.inner.distinct_keys(query).await
    }

    async fn find_by_keys(&self, keys: &[String]) -> StoreResult<Vec<CitationRecord>> {
        self.inner.find_by_keys(keys).await
    }

    async fn set_identifier(&self, _: &str, _: &str, _: DateTime<Utc>) -> StoreResult<bool> {
        Err(backend_down())
    }

    async fn set_citation_text(&self, _: &str, _: &str, _: DateTime<Utc>) -> StoreResult<bool> {
        Err(backend_down())
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        self.inner.status_counts().await
    }
}

pub fn fixed_clock(now: DateTime<Utc>) -> Clock {
    Arc::new(move || now)
}

pub fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - TimeDelta::days(days)
}

pub fn stage_config(batch_size: i64) -> StageConfig {
    StageConfig {
        batch_size,
        grace_period: TimeDelta::days(1),
        throttle: Duration::ZERO,
        error_threshold: 3,
    }
}

pub fn assigned(key: &str, identifier: &str, created_at: DateTime<Utc>) -> CitationRecord {
    CitationRecord::pending(key, created_at).with_identifier(identifier)
}

pub fn ready(key: &str, identifier: &str, text: &str, created_at: DateTime<Utc>) -> CitationRecord {
    assigned(key, identifier, created_at).with_citation_text(text)
}
