// Validation stage: PENDING -> IDENTIFIER_ASSIGNED

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::{system_clock, Clock, PipelineStage, StageReport, Throttle};
use crate::config::StageConfig;
use crate::error::PipelineResult;
use crate::registry::{LookupKey, LookupOutcome, RegistryClient};
use crate::selector::{BatchLimit, BatchSize, Stage, StageSelector};
use crate::store::CitationStore;

/// Asks the registry whether pending keys have been assigned an identifier.
///
/// A key the registry does not know yet is left exactly as it was, including
/// its `updated_at`, so it stays at the front of the next run's selection.
pub struct ValidationStage {
    store: Arc<dyn CitationStore>,
    registry: Arc<dyn RegistryClient>,
    selector: StageSelector,
    throttle: Duration,
    clock: Clock,
    span: Span,
}

impl ValidationStage {
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
            clock: system_clock(),
            span: info_span!("stage", stage = "validation"),
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

    async fn execute(&self) -> PipelineResult<StageReport> {
        let query = self.selector.query(Stage::Validation, (self.clock)());
        let keys = self.store.distinct_keys(&query).await?;

        if keys.is_empty() {
            info!("No pending records old enough to validate");
            return Ok(StageReport::nothing_to_do(Stage::Validation));
        }

        info!("Validating {} pending records (limit {})", keys.len(), self.selector.limit());

        let mut report = StageReport::new(Stage::Validation);
        report.selected = keys.len();
        let mut throttle = Throttle::new(self.throttle);

        for key in keys {
            throttle.wait().await;

            match self.registry.lookup(&LookupKey::Catalog(key.clone())).await {
                Ok(LookupOutcome::Found(identifier)) => {
                    if self.store.set_identifier(&key, &identifier, (self.clock)()).await? {
                        info!(key = %key, identifier = %identifier, "Identifier assigned");
                        report.advanced += 1;
                    } else {
                        warn!(key = %key, "Record no longer pending, skipping");
                        report.skipped += 1;
                    }
                },
                Ok(LookupOutcome::NotFound) => {
                    debug!(key = %key, "No identifier registered yet");
                    report.not_found += 1;
                },
                Err(e) if e.is_transport() => {
                    warn!(key = %key, error = %e, "Registry unreachable, retrying next run");
                    report.skipped += 1;
                },
                Err(e) => {
                    error!(key = %key, error = %e, "Registry lookup failed");
                    report.failed += 1;
                },
            }
        }

        info!("{}", report.summary());
        Ok(report)
    }
}

#[async_trait]
impl PipelineStage for ValidationStage {
    fn stage(&self) -> Stage {
        Stage::Validation
    }

    async fn run(&self) -> PipelineResult<StageReport> {
        self.execute().instrument(self.span.clone()).await
    }
}
