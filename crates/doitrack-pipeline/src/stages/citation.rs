// Citation stage: IDENTIFIER_ASSIGNED -> CITATION_READY

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::{system_clock, Clock, PipelineStage, StageReport, Throttle};
use crate::bibtex::BibtexParser;
use crate::config::StageConfig;
use crate::error::PipelineResult;
use crate::registry::{registry_item_id, RegistryClient};
use crate::selector::{BatchLimit, BatchSize, Stage, StageSelector};
use crate::store::CitationStore;

/// Fetches BibTeX for identified records and stores it normalized.
///
/// Registry and content failures are counted against an error threshold; once
/// the count exceeds it, the remaining candidates are left for a later run.
pub struct CitationStage {
    store: Arc<dyn CitationStore>,
    registry: Arc<dyn RegistryClient>,
    selector: StageSelector,
    throttle: Duration,
    error_threshold: u32,
    clock: Clock,
    span: Span,
}

impl CitationStage {
    pub fn new(
        store: Arc<dyn CitationStore>,
        registry: Arc<dyn RegistryClient>,
        config: &StageConfig,
    ) -> Self {
        Self::for_batch(store, registry, config, &BatchLimit::resolve(config.batch_size))
    }

    /// Like [`new`](Self::new), with a batch size the caller already resolved
    pub fn for_batch(
        store: Arc<dyn CitationStore>,
        registry: Arc<dyn RegistryClient>,
        config: &StageConfig,
        batch: &BatchSize,
    ) -> Self {
        Self {
            store,
            registry,
            selector: StageSelector::new(config.grace_period, batch),
            throttle: config.throttle,
            error_threshold: config.error_threshold,
            clock: system_clock(),
            span: info_span!("stage", stage = "citation"),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn selector(&self) -> &StageSelector {
        &self.selector
    }

    /// Fetch and normalize the citation text for one identifier
    async fn fetch_normalized(&self, key: &str, identifier: &str) -> Result<String, String> {
        let item_id = registry_item_id(identifier)
            .ok_or_else(|| format!("identifier {} has no registry item id", identifier))?;

        let payload = self
            .registry
            .fetch_citation_text(item_id)
            .await
            .map_err(|e| e.to_string())?;

        let bibliography = BibtexParser::parse_bytes(&payload).map_err(|e| e.to_string())?;
        if bibliography.is_empty() {
            return Err(format!("citation payload for {} contains no entries", item_id));
        }

        debug!(key = %key, entries = bibliography.len(), "Parsed citation");
        Ok(bibliography.to_bibtex())
    }

    async fn execute(&self) -> PipelineResult<StageReport> {
        let query = self.selector.query(Stage::Citation, (self.clock)());
        let records = self.store.find(&query).await?;

        if records.is_empty() {
            info!("No identified records awaiting citation text");
            return Ok(StageReport::nothing_to_do(Stage::Citation));
        }

        info!("Fetching citations for {} records (limit {})", records.len(), self.selector.limit());

        let mut report = StageReport::new(Stage::Citation);
        report.selected = records.len();
        let mut throttle = Throttle::new(self.throttle);
        let mut errors: u32 = 0;

        for (idx, record) in records.iter().enumerate() {
            if errors > self.error_threshold {
                report.tripped = true;
                report.aborted = records.len() - idx;
                error!(
                    errors,
                    threshold = self.error_threshold,
                    remaining = report.aborted,
                    "Too many citation errors, aborting run"
                );
                break;
            }

            let Some(identifier) = record.identifier.as_deref() else {
                warn!(key = %record.key, "Selected record has no identifier, skipping");
                report.skipped += 1;
                continue;
            };

            throttle.wait().await;

            let citation_text = match self.fetch_normalized(&record.key, identifier).await {
                Ok(text) => text,
                Err(reason) => {
                    errors += 1;
                    report.failed += 1;
                    error!(key = %record.key, identifier = %identifier, errors, "{}", reason);
                    continue;
                },
            };

            if self
                .store
                .set_citation_text(&record.key, &citation_text, (self.clock)())
                .await?
            {
                info!(key = %record.key, "Citation text saved");
                report.advanced += 1;
            } else {
                warn!(key = %record.key, "Record changed since selection, skipping");
                report.skipped += 1;
            }
        }

        info!("{}", report.summary());
        Ok(report)
    }
}

#[async_trait]
impl PipelineStage for CitationStage {
    fn stage(&self) -> Stage {
        Stage::Citation
    }

    async fn run(&self) -> PipelineResult<StageReport> {
        self.execute().instrument(self.span.clone()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stages::test_support::{fixed_clock, stage_config, FakeRegistry, Reply};
    use crate::store::MemoryCitationStore;
    use chrono::TimeDelta;
    use doitrack_common::{CitationRecord, RecordStatus};

    #[tokio::test]
    async fn test_citation_saved_normalized() {
        let (now, clock) = fixed_clock();
        let store = Arc::new(
            MemoryCitationStore::with_records([CitationRecord::pending("mp-1", now - TimeDelta::days(3))
                .with_identifier("10.17188/1190959")])
            .await,
        );
        let registry = Arc::new(FakeRegistry::new());
        registry.citation_reply(
            "1190959",
            Reply::Payload(b"@misc{osti_1190959,\n  title = {Si},\n  author = {MP}\n}".to_vec()),
        );

        let stage = CitationStage::new(store.clone(), registry.clone(), &stage_config(5))
            .with_clock(clock);
        let report = stage.run().await.unwrap();

        assert_eq!(report.advanced, 1);
        assert_eq!(registry.citation_calls(), vec!["1190959"]);

        let record = store.get("mp-1").await.unwrap().unwrap();
        assert_eq!(record.status(), RecordStatus::CitationReady);
        assert_eq!(
            record.citation_text.as_deref(),
            Some("@misc{osti_1190959,\n author = {MP},\n title = {Si}\n}\n")
        );
    }

    #[tokio::test]
    async fn test_empty_payload_is_an_error() {
        let (now, clock) = fixed_clock();
        let store = Arc::new(
            MemoryCitationStore::with_records([CitationRecord::pending("mp-2", now - TimeDelta::days(3))
                .with_identifier("10.17188/2")])
            .await,
        );
        let registry = Arc::new(FakeRegistry::new());
        registry.citation_reply("2", Reply::Payload(Vec::new()));

        let stage = CitationStage::new(store.clone(), registry, &stage_config(5)).with_clock(clock);
        let report = stage.run().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.advanced, 0);
        assert_eq!(
            store.get("mp-2").await.unwrap().unwrap().status(),
            RecordStatus::IdentifierAssigned
        );
    }
}
