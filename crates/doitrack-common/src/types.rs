//! Common types used across doitrack

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a citation request.
///
/// Never stored; always derived from which fields of a [`CitationRecord`] are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// No identifier assigned yet
    Pending,
    /// Identifier assigned, citation text not yet fetched
    IdentifierAssigned,
    /// Identifier and citation text both present
    CitationReady,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::IdentifierAssigned => "IDENTIFIER_ASSIGNED",
            RecordStatus::CitationReady => "CITATION_READY",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One citation request per catalog item that needs a persistent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    /// Unique catalog key, immutable
    pub key: String,
    /// Registry-assigned DOI, absent until validated
    pub identifier: Option<String>,
    /// Normalized BibTeX text, absent until fetched
    pub citation_text: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last successful stage transition
    pub updated_at: DateTime<Utc>,
}

impl CitationRecord {
    /// A freshly enqueued request with neither identifier nor citation text.
    pub fn pending(key: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            identifier: None,
            citation_text: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_citation_text(mut self, citation_text: impl Into<String>) -> Self {
        self.citation_text = Some(citation_text.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn status(&self) -> RecordStatus {
        match (&self.identifier, &self.citation_text) {
            (None, _) => RecordStatus::Pending,
            (Some(_), None) => RecordStatus::IdentifierAssigned,
            (Some(_), Some(_)) => RecordStatus::CitationReady,
        }
    }

    /// Citation text must never be present without an identifier.
    pub fn is_consistent(&self) -> bool {
        self.citation_text.is_none() || self.identifier.is_some()
    }
}

/// A record in the downstream target dataset. Created and owned externally;
/// only the two merged fields are ever written here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub key: String,
    pub merged_identifier: Option<String>,
    pub merged_citation_text: Option<String>,
}

impl TargetRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            merged_identifier: None,
            merged_citation_text: None,
        }
    }

    /// A target counts as merged once either merged field is populated.
    pub fn is_merged(&self) -> bool {
        self.merged_identifier.is_some() || self.merged_citation_text.is_some()
    }
}

/// Number of citation records per derived status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub identifier_assigned: u64,
    pub citation_ready: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: RecordStatus) {
        match status {
            RecordStatus::Pending => self.pending += 1,
            RecordStatus::IdentifierAssigned => self.identifier_assigned += 1,
            RecordStatus::CitationReady => self.citation_ready += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.identifier_assigned + self.citation_ready
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_derived_from_fields() {
        let now = Utc::now();
        let record = CitationRecord::pending("mp-1", now);
        assert_eq!(record.status(), RecordStatus::Pending);

        let record = record.with_identifier("10.17188/1");
        assert_eq!(record.status(), RecordStatus::IdentifierAssigned);

        let record = record.with_citation_text("@misc{x,\n}\n");
        assert_eq!(record.status(), RecordStatus::CitationReady);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_citation_without_identifier_is_inconsistent() {
        let record = CitationRecord::pending("mp-2", Utc::now()).with_citation_text("@misc{x,\n}\n");
        assert_eq!(record.status(), RecordStatus::Pending);
        assert!(!record.is_consistent());
    }

    #[test]
    fn test_status_counts_total() {
        let mut counts = StatusCounts::default();
        counts.record(RecordStatus::Pending);
        counts.record(RecordStatus::Pending);
        counts.record(RecordStatus::CitationReady);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.citation_ready, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_target_merged_flag() {
        let mut target = TargetRecord::new("mp-3");
        assert!(!target.is_merged());
        target.merged_identifier = Some("10.17188/3".to_string());
        assert!(target.is_merged());
    }
}
