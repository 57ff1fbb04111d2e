//! doitrack Pipeline Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Drives catalog items through the persistent-identifier lifecycle:
//!
//! - **Validation**: ask the registry whether a pending key has been assigned a DOI
//! - **Citation**: fetch BibTeX for identified records and store it normalized
//! - **Merge**: copy identifier and citation text into the target dataset
//!
//! Each stage is a short, bounded, restartable batch. Progress lives entirely in
//! the store, so a stage can be killed at any point and simply re-run.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use doitrack_pipeline::config::PipelineConfig;
//! use doitrack_pipeline::registry::ElinkClient;
//! use doitrack_pipeline::store::{postgres, PgCitationStore, PgTargetStore};
//! use doitrack_pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load()?;
//!     let pool = postgres::connect(&config.database).await?;
//!     let registry = ElinkClient::new(config.registry.clone())?;
//!
//!     let pipeline = Pipeline::new(
//!         Arc::new(PgCitationStore::new(pool.clone())),
//!         Arc::new(PgTargetStore::new(pool)),
//!         Arc::new(registry),
//!         &config.stage,
//!     );
//!     for report in pipeline.run_all().await? {
//!         println!("{}", report.summary());
//!     }
//!     Ok(())
//! }
//! ```

pub mod bibtex;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod selector;
pub mod stages;
pub mod store;

pub use error::{PipelineError, PipelineResult};
pub use pipeline::Pipeline;
pub use selector::{BatchLimit, BatchSize, Stage, StageSelector};
pub use stages::{CitationStage, MergeStage, PipelineStage, StageReport, ValidationStage};
