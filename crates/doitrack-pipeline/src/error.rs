//! Pipeline error type

use thiserror::Error;

use crate::store::StoreError;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors that end a stage run.
///
/// Per-record registry and content failures are counted in the stage report
/// instead of surfacing here; only persistence failures abort a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
