//! Pipeline stages
//!
//! Each stage is a bounded batch that advances records one step through the
//! lifecycle. A run either completes with a [`StageReport`] or stops on the
//! first persistence failure; registry and content failures are per-record and
//! only show up in the report counters.

pub mod citation;
pub mod merge;
pub mod validation;

pub use citation::CitationStage;
pub use merge::MergeStage;
pub use validation::ValidationStage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineResult;
use crate::selector::Stage;

/// Source of "now" for selection cutoffs and transition timestamps
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A stage that can be run as one batch
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(&self) -> PipelineResult<StageReport>;
}

/// Outcome of a single stage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Candidates selected for this run
    pub selected: usize,
    /// Records moved to the next status (or merged)
    pub advanced: usize,
    /// Lookups for which the registry had no identifier yet
    pub not_found: usize,
    /// Transient failures and records that changed underneath the run
    pub skipped: usize,
    /// Registry or content errors
    pub failed: usize,
    /// Candidates left untouched because the circuit breaker tripped
    pub aborted: usize,
    pub tripped: bool,
    pub no_work: bool,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            selected: 0,
            advanced: 0,
            not_found: 0,
            skipped: 0,
            failed: 0,
            aborted: 0,
            tripped: false,
            no_work: false,
        }
    }

    pub(crate) fn nothing_to_do(stage: Stage) -> Self {
        Self {
            no_work: true,
            ..Self::new(stage)
        }
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        if self.no_work {
            return format!("{}: no work available", self.stage);
        }

        let mut summary = format!(
            "{}: selected={} advanced={} not_found={} skipped={} failed={}",
            self.stage, self.selected, self.advanced, self.not_found, self.skipped, self.failed
        );
        if self.tripped {
            summary.push_str(&format!(" aborted={} (error threshold exceeded)", self.aborted));
        }
        summary
    }
}

/// Fixed delay between successive registry calls. The first call is not delayed.
#[derive(Debug)]
pub(crate) struct Throttle {
    delay: Duration,
    primed: bool,
}

impl Throttle {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            primed: false,
        }
    }

    pub(crate) async fn wait(&mut self) {
        if self.primed && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.primed = true;
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_for_empty_run() {
        let report = StageReport::nothing_to_do(Stage::Merge);
        assert_eq!(report.summary(), "merge: no work available");
    }

    #[test]
    fn test_summary_mentions_breaker() {
        let report = StageReport {
            selected: 5,
            failed: 4,
            aborted: 1,
            tripped: true,
            ..StageReport::new(Stage::Citation)
        };
        let summary = report.summary();
        assert!(summary.starts_with("citation: selected=5"));
        assert!(summary.contains("aborted=1"));
    }

    #[test]
    fn test_report_serializes_stage_name() {
        let json = serde_json::to_value(StageReport::new(Stage::Validation)).unwrap();
        assert_eq!(json["stage"], "validation");
        assert_eq!(json["no_work"], false);
    }

    #[tokio::test]
    async fn test_stages_log_inside_injected_span() {
        use crate::store::{MemoryCitationStore, MemoryTargetStore};
        use super::test_support::{stage_config, EventCapture, FakeRegistry};
        use tracing::info_span;

        let capture = EventCapture::default();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let citations = Arc::new(MemoryCitationStore::new());
        let targets = Arc::new(MemoryTargetStore::new());
        let registry = Arc::new(FakeRegistry::new());
        let config = stage_config(5);

        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(
                ValidationStage::new(citations.clone(), registry.clone(), &config)
                    .with_span(info_span!("nightly_validation")),
            ),
            Box::new(
                CitationStage::new(citations.clone(), registry, &config)
                    .with_span(info_span!("nightly_citation")),
            ),
            Box::new(MergeStage::new(citations, targets).with_span(info_span!("nightly_merge"))),
        ];

        for stage in &stages {
            assert!(stage.run().await.unwrap().no_work);
        }

        for name in ["nightly_validation", "nightly_citation", "nightly_merge"] {
            assert!(capture.logged_inside(name), "nothing logged inside {}", name);
        }
        assert!(!capture.logged_inside("stage"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_skips_first_call() {
        let mut throttle = Throttle::new(Duration::from_millis(500));
        let start = tokio::time::Instant::now();

        throttle.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        throttle.wait().await;
        throttle.wait().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1500));
    }
}
