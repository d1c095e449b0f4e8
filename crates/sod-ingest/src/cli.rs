//! Command-line surface of the `sod` binary

use crate::config::{secs_to_duration, PipelineConfig};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sod_common::types::{FIRST_YEAR, LAST_YEAR};
use std::path::PathBuf;
use tracing::warn;

/// FDIC Summary of Deposits pipeline
#[derive(Parser, Debug)]
#[command(name = "sod")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// First survey year
    #[arg(long, default_value_t = FIRST_YEAR, global = true)]
    pub start_year: i32,

    /// Last survey year
    #[arg(long, default_value_t = LAST_YEAR, global = true)]
    pub end_year: i32,

    /// Directory for raw downloads
    #[arg(long, global = true)]
    pub raw_dir: Option<PathBuf>,

    /// Directory for canonical Parquet files
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// FDIC API key
    #[arg(long, env = "FDIC_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Minimum seconds between outbound requests
    #[arg(long, global = true)]
    pub delay: Option<f64>,

    /// Worker threads for normalization and verification
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Process years one at a time
    #[arg(long, global = true, conflicts_with = "workers")]
    pub no_parallel: bool,

    /// Re-download and re-normalize even when artifacts exist
    #[arg(short, long, global = true)]
    pub force: bool,

    /// Skip the field registry; columns carry no descriptions
    #[arg(long, global = true)]
    pub no_descriptions: bool,

    /// Fetch the field registry even when a cached copy exists
    #[arg(long, global = true, conflicts_with = "no_descriptions")]
    pub refresh_schema: bool,

    /// Export the field dictionary (CSV, or JSON for a .json path)
    #[arg(long, value_name = "PATH", global = true)]
    pub dictionary: Option<PathBuf>,

    /// Export the per-year summary as CSV
    #[arg(long, value_name = "PATH", global = true)]
    pub summary_csv: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Fetch raw artifacts for each year
    Download,

    /// Normalize raw artifacts into canonical Parquet files
    Parse,

    /// Verify canonical Parquet files and report statistics
    Summarize,

    /// Download, parse, and summarize
    Run,
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Download => "download",
            Command::Parse => "parse",
            Command::Summarize => "summarize",
            Command::Run => "run",
        }
    }
}

impl Cli {
    /// Inclusive year range after clamping to the published years
    pub fn resolve_years(&self) -> Result<(i32, i32)> {
        let mut start = self.start_year;
        let mut end = self.end_year;
        if start < FIRST_YEAR {
            warn!(requested = start, clamped = FIRST_YEAR, "Start year precedes the survey");
            start = FIRST_YEAR;
        }
        if end > LAST_YEAR {
            warn!(requested = end, clamped = LAST_YEAR, "End year is past the last supported year");
            end = LAST_YEAR;
        }
        if start > end {
            bail!("Start year {} is after end year {}", start, end);
        }
        Ok((start, end))
    }

    /// Overlay the flags on a base configuration
    pub fn apply(&self, mut config: PipelineConfig) -> Result<PipelineConfig> {
        if let Some(dir) = &self.raw_dir {
            config.raw_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(key) = self.api_key.as_deref().map(str::trim) {
            if !key.is_empty() {
                config.api.api_key = Some(key.to_string());
            }
        }
        if let Some(delay) = self.delay {
            config.retry.request_interval = secs_to_duration(delay)?;
        }
        if self.no_parallel {
            config.workers = 1;
        } else if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.force = self.force;
        config.schema.refresh = self.refresh_schema;

        // Verification reads only the identifier columns
        let needs_registry = match self.command {
            Command::Summarize => self.dictionary.is_some(),
            _ => true,
        };
        config.schema.enabled = needs_registry && !self.no_descriptions;

        config.validate()?;
        Ok(config)
    }
}
