//! SOD Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Acquisition, normalization, and verification of the FDIC Summary of
//! Deposits branch survey, one file per year.
//!
//! # Stages
//!
//! - **Download**: bulk archives up to 1993, the paginated Banks API after
//! - **Normalize**: raw CSV to a canonical Parquet file per year
//! - **Summarize**: read the Parquet files back and check them
//!
//! # Example
//!
//! ```no_run
//! use sod_ingest::{Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::connect(PipelineConfig::from_env()?).await?;
//!     let report = pipeline.run(2019, 2021).await?;
//!     println!("{}", report.render());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod artifact;
pub mod cli;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod schema;
pub mod summarize;

// Re-export commonly used types
pub use config::{PipelineConfig, RetryPolicy};
pub use download::{ArtifactRef, DownloadReport, Downloader};
pub use error::{DownloadError, FetchError, ParseError, SummaryError, YearFailure};
pub use http::{Clock, ManualClock, RetryingClient, TokioClock};
pub use normalize::{CanonicalArtifact, NormalizeReport, Normalizer};
pub use pipeline::Pipeline;
pub use schema::{FdicSchemaRegistry, SchemaRegistry, StaticRegistry};
pub use summarize::{PipelineReport, Summarizer, YearEntry, YearSummary};
