//! Identifier registry client
//!
//! One capability interface covering the registry's two reads (key lookup and
//! citation text) and its single write (submission).

pub mod elink;
pub mod models;

pub use elink::ElinkClient;
pub use models::{LookupHit, SubmissionRecord, SubmitResponse, SubmittedRecord};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Registry returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to decode registry response: {0}")]
    Decode(String),

    #[error("Failed to encode registry request: {0}")]
    Encode(String),

    #[error("Registry client misconfigured: {0}")]
    Config(String),
}

impl RegistryError {
    /// Network-level failure (connect, timeout, interrupted body)
    pub fn is_transport(&self) -> bool {
        matches!(self, RegistryError::Transport(_))
    }
}

/// How a catalog item is addressed in a lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    /// Catalog key of the item, e.g. `mp-149`
    Catalog(String),
    /// Registry-assigned numeric id
    RegistryId(String),
}

impl LookupKey {
    /// Query parameter name and value for this key
    pub fn query_param(&self) -> (&'static str, &str) {
        match self {
            LookupKey::Catalog(key) => ("site_unique_id", key),
            LookupKey::RegistryId(id) => ("osti_id", id),
        }
    }
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (param, value) = self.query_param();
        write!(f, "{}={}", param, value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(String),
    NotFound,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Look up the identifier currently assigned to `key`
    async fn lookup(&self, key: &LookupKey) -> Result<LookupOutcome, RegistryError>;

    /// Fetch raw citation text for a registry item id
    async fn fetch_citation_text(&self, item_id: &str) -> Result<Vec<u8>, RegistryError>;

    /// Register or update records
    async fn submit(&self, records: &[SubmissionRecord]) -> Result<SubmitResponse, RegistryError>;
}

/// Registry item id of an identifier: its last path segment.
///
/// `10.17188/1190959` yields `1190959`. Returns `None` if there is no
/// non-empty trailing segment.
pub fn registry_item_id(identifier: &str) -> Option<&str> {
    identifier
        .trim()
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
}
