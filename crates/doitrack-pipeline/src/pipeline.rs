//! Stage wiring
//!
//! Builds the three stages over shared stores and a registry client and runs
//! them in lifecycle order.

use std::sync::Arc;
use tracing::info;

use crate::config::{ScheduleConfig, StageConfig};
use crate::error::PipelineResult;
use crate::registry::RegistryClient;
use crate::scheduler::StageScheduler;
use crate::selector::BatchLimit;
use crate::stages::{CitationStage, Clock, MergeStage, PipelineStage, StageReport, ValidationStage};
use crate::store::{CitationStore, TargetStore};

pub struct Pipeline {
    validation: ValidationStage,
    citation: CitationStage,
    merge: MergeStage,
}

impl Pipeline {
    pub fn new(
        citations: Arc<dyn CitationStore>,
        targets: Arc<dyn TargetStore>,
        registry: Arc<dyn RegistryClient>,
        config: &StageConfig,
    ) -> Self {
        let batch = BatchLimit::resolve(config.batch_size);
        Self {
            validation: ValidationStage::for_batch(citations.clone(), registry.clone(), config, &batch),
            citation: CitationStage::for_batch(citations.clone(), registry, config, &batch),
            merge: MergeStage::new(citations, targets),
        }
    }

    pub fn with_clock(self, clock: Clock) -> Self {
        Self {
            validation: self.validation.with_clock(clock.clone()),
            citation: self.citation.with_clock(clock),
            merge: self.merge,
        }
    }

    pub fn validation(&self) -> &ValidationStage {
        &self.validation
    }

    pub fn citation(&self) -> &CitationStage {
        &self.citation
    }

    pub fn merge(&self) -> &MergeStage {
        &self.merge
    }

    /// Run validation, citation and merge once each, in that order.
    ///
    /// Stops at the first stage that fails on persistence.
    pub async fn run_all(&self) -> PipelineResult<Vec<StageReport>> {
        let stages: [&dyn PipelineStage; 3] = [&self.validation, &self.citation, &self.merge];
        let mut reports = Vec::with_capacity(stages.len());

        for stage in stages {
            info!("Running {} stage", stage.stage());
            reports.push(stage.run().await?);
        }

        Ok(reports)
    }

    /// Hand each stage to a scheduler on its configured cadence
    pub fn into_scheduler(self, schedule: &ScheduleConfig) -> StageScheduler {
        StageScheduler::new()
            .add(Arc::new(self.validation), schedule.validation_every)
            .add(Arc::new(self.citation), schedule.citation_every)
            .add(Arc::new(self.merge), schedule.merge_every)
    }
}
