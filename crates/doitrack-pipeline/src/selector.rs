//! Batch selection
//!
//! Turns a stage and a requested batch size into the query a stage runs
//! against the citation store.

use chrono::{DateTime, TimeDelta, Utc};
use doitrack_common::RecordStatus;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::store::CitationQuery;

/// Limit used whenever the requested batch size is not positive.
pub const MIN_BATCH_LIMIT: i64 = 1;

/// Pipeline stages, in lifecycle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Citation,
    Merge,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::Citation => "citation",
            Stage::Merge => "merge",
        }
    }

    /// Status a record must have to be picked up by this stage
    pub fn precondition(&self) -> RecordStatus {
        match self {
            Stage::Validation => RecordStatus::Pending,
            Stage::Citation => RecordStatus::IdentifierAssigned,
            Stage::Merge => RecordStatus::CitationReady,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective number of records a stage may select in one run. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct BatchLimit(i64);

impl BatchLimit {
    /// Map a requested batch size to an effective limit.
    ///
    /// A positive request `n` yields `2n`, so a run has headroom for records it
    /// will skip. Anything else yields [`MIN_BATCH_LIMIT`] together with a
    /// diagnostic; a bad request never fails the run.
    pub fn resolve(requested: i64) -> BatchSize {
        if requested > 0 {
            return BatchSize::Accepted {
                requested,
                limit: BatchLimit(requested.saturating_mul(2)),
            };
        }

        let diagnostic = format!("invalid number of requested records ({})", requested);
        error!(requested, "{}", diagnostic);
        info!(limit = MIN_BATCH_LIMIT, "falling back to minimum batch limit");

        BatchSize::Fallback {
            requested,
            limit: BatchLimit(MIN_BATCH_LIMIT),
            diagnostic,
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for BatchLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of resolving a requested batch size
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSize {
    Accepted {
        requested: i64,
        limit: BatchLimit,
    },
    Fallback {
        requested: i64,
        limit: BatchLimit,
        diagnostic: String,
    },
}

impl BatchSize {
    pub fn limit(&self) -> BatchLimit {
        match self {
            BatchSize::Accepted { limit, .. } | BatchSize::Fallback { limit, .. } => *limit,
        }
    }

    pub fn requested(&self) -> i64 {
        match self {
            BatchSize::Accepted { requested, .. } | BatchSize::Fallback { requested, .. } => {
                *requested
            }
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            BatchSize::Accepted { .. } => None,
            BatchSize::Fallback { diagnostic, .. } => Some(diagnostic),
        }
    }
}

/// Builds the candidate query for validation and citation runs.
///
/// Candidates must be older than the grace period and are taken oldest
/// `updated_at` first, so records that keep failing rotate to the back.
#[derive(Debug, Clone)]
pub struct StageSelector {
    grace_period: TimeDelta,
    limit: BatchLimit,
}

impl StageSelector {
    pub fn new(grace_period: TimeDelta, batch: &BatchSize) -> Self {
        Self {
            grace_period,
            limit: batch.limit(),
        }
    }

    pub fn limit(&self) -> BatchLimit {
        self.limit
    }

    pub fn grace_period(&self) -> TimeDelta {
        self.grace_period
    }

    /// Newest `created_at` eligible for selection at `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.grace_period)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn query(&self, stage: Stage, now: DateTime<Utc>) -> CitationQuery {
        CitationQuery::for_status(stage.precondition())
            .created_before(self.cutoff(now))
            .limit(self.limit.get())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_request_is_doubled() {
        let batch = BatchLimit::resolve(5);
        assert_eq!(batch.limit().get(), 10);
        assert_eq!(batch.requested(), 5);
        assert!(batch.diagnostic().is_none());
    }

    #[test]
    fn test_zero_request_falls_back() {
        let batch = BatchLimit::resolve(0);
        assert_eq!(batch.limit().get(), MIN_BATCH_LIMIT);
        assert!(batch.diagnostic().unwrap().contains("(0)"));
    }

    #[test]
    fn test_negative_request_falls_back() {
        let batch = BatchLimit::resolve(-3);
        assert_eq!(batch.limit().get(), 1);
        assert!(matches!(batch, BatchSize::Fallback { requested: -3, .. }));
    }

    #[test]
    fn test_huge_request_saturates() {
        let batch = BatchLimit::resolve(i64::MAX);
        assert_eq!(batch.limit().get(), i64::MAX);
    }

    #[test]
    fn test_query_carries_grace_cutoff_and_limit() {
        let now = Utc::now();
        let selector = StageSelector::new(TimeDelta::days(1), &BatchLimit::resolve(2));
        let query = selector.query(Stage::Citation, now);

        assert_eq!(query.status, RecordStatus::IdentifierAssigned);
        assert_eq!(query.created_before, Some(now - TimeDelta::days(1)));
        assert_eq!(query.limit, Some(4));
    }

    #[test]
    fn test_stage_preconditions() {
        assert_eq!(Stage::Validation.precondition(), RecordStatus::Pending);
        assert_eq!(Stage::Merge.precondition(), RecordStatus::CitationReady);
        assert_eq!(Stage::Citation.to_string(), "citation");
    }
}
