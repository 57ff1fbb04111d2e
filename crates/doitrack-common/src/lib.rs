//! doitrack Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the doitrack workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`DoiTrackError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: citation-request and target-dataset records plus their derived status
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use doitrack_common::types::{CitationRecord, RecordStatus};
//!
//! let record = CitationRecord::pending("mp-149", Utc::now());
//! assert_eq!(record.status(), RecordStatus::Pending);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{DoiTrackError, Result};
pub use types::{CitationRecord, RecordStatus, StatusCounts, TargetRecord};
