//! SOD Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Summary of Deposits
//! pipeline.
//!
//! # Overview
//!
//! - **Error Handling**: [`SodError`] and the [`Result`] alias
//! - **Checksums**: SHA-256 digests for persisted artifacts
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: the per-year unit of work and field descriptors
//!
//! # Example
//!
//! ```no_run
//! use sod_common::types::{SourceStrategy, YearUnit};
//!
//! let unit = YearUnit::new(1990, "data/raw", "data/processed");
//! assert_eq!(unit.strategy, SourceStrategy::BulkArchive);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SodError};
