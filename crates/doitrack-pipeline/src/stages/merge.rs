// Merge stage: copy identifier + citation text into the target dataset

use async_trait::async_trait;
use doitrack_common::RecordStatus;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument, Span};

use super::{PipelineStage, StageReport};
use crate::error::PipelineResult;
use crate::selector::Stage;
use crate::store::{CitationQuery, CitationStore, TargetStore};

/// Copies citation-ready records into unmerged target records.
///
/// Makes no registry calls, so there is no grace period, batch limit or
/// throttle. Targets that are missing or already merged are never touched.
pub struct MergeStage {
    citations: Arc<dyn CitationStore>,
    targets: Arc<dyn TargetStore>,
    span: Span,
}

impl MergeStage {
    pub fn new(citations: Arc<dyn CitationStore>, targets: Arc<dyn TargetStore>) -> Self {
        Self {
            citations,
            targets,
            span: info_span!("stage", stage = "merge"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    async fn execute(&self) -> PipelineResult<StageReport> {
        let ready = self
            .citations
            .distinct_keys(&CitationQuery::for_status(RecordStatus::CitationReady))
            .await?;
        if ready.is_empty() {
            info!("No citation-ready records");
            return Ok(StageReport::nothing_to_do(Stage::Merge));
        }

        let unmerged = self.targets.unmerged_keys(&ready).await?;
        if unmerged.is_empty() {
            info!("All {} citation-ready records already merged or without target", ready.len());
            return Ok(StageReport::nothing_to_do(Stage::Merge));
        }

        let records = self.citations.find_by_keys(&unmerged).await?;
        info!("Merging {} records into the target dataset", records.len());

        let mut report = StageReport::new(Stage::Merge);
        report.selected = records.len();

        for record in records {
            let (Some(identifier), Some(citation_text)) =
                (record.identifier.as_deref(), record.citation_text.as_deref())
            else {
                warn!(key = %record.key, "Record lost its citation fields, skipping");
                report.skipped += 1;
                continue;
            };

            if self
                .targets
                .set_merged(&record.key, identifier, citation_text)
                .await?
            {
                info!(key = %record.key, identifier = %identifier, "Merged");
                report.advanced += 1;
            } else {
                warn!(key = %record.key, "Target merged concurrently, skipping");
                report.skipped += 1;
            }
        }

        info!("{}", report.summary());
        Ok(report)
    }
}

#[async_trait]
impl PipelineStage for MergeStage {
    fn stage(&self) -> Stage {
        Stage::Merge
    }

    async fn run(&self) -> PipelineResult<StageReport> {
        self.execute().instrument(self.span.clone()).await
    }
}
