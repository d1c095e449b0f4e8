//! Verification summarizer
//!
//! Reads canonical artifacts back and checks that each one is complete:
//! row and column counts, no null or negative certificates, and a
//! reporting period equal to June 30 of the file's year. Only the two
//! identifier columns are decoded; the rest of the file is counted from
//! the footer.

pub mod report;

pub use report::{write_summary_csv, OverallStats, PipelineReport, YearEntry};

use crate::error::{SummaryError, YearFailure};
use crate::normalize::writer::{META_DROPPED_ROWS, META_YEAR};
use arrow::array::{Array, Date32Array, Int64Array};
use chrono::Datelike;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use rayon::prelude::*;
use serde::Serialize;
use sod_common::types::{
    normalized_file_name, reporting_period, CERT_COLUMN, IDENTIFIER_COLUMNS,
    REPORTING_PERIOD_COLUMN,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Verification result for one year
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub rows: usize,
    pub columns: usize,
    /// Columns other than the two identifiers
    pub variables: usize,
    pub null_certificates: usize,
    pub negative_certificates: usize,
    pub period_mismatches: usize,
    /// Rows dropped during normalization, when the footer records it
    pub dropped_rows: Option<usize>,
    pub bytes: u64,
}

impl YearSummary {
    /// Sanity check violations, empty when the artifact is sound
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.rows == 0 {
            issues.push("no rows".to_string());
        }
        if self.null_certificates > 0 {
            issues.push(format!("{} null certificates", self.null_certificates));
        }
        if self.negative_certificates > 0 {
            issues.push(format!("{} negative certificates", self.negative_certificates));
        }
        if self.period_mismatches > 0 {
            issues.push(format!(
                "{} rows with a reporting period other than {}-06-30",
                self.period_mismatches, self.year
            ));
        }
        issues
    }
}

/// Canonical artifacts under `dir`, keyed by the year in the file name
///
/// Returned in directory order; the report sorts.
pub fn discover_artifacts(dir: &Path) -> std::io::Result<Vec<(i32, PathBuf)>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_parquet = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("parquet"))
            .unwrap_or(false);
        if !is_parquet {
            continue;
        }
        let year = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<i32>().ok());
        if let Some(year) = year {
            found.push((year, path));
        }
    }
    Ok(found)
}

/// Expected artifact paths for an inclusive year range
pub fn expected_artifacts(dir: &Path, start: i32, end: i32) -> Vec<(i32, PathBuf)> {
    (start..=end)
        .map(|year| (year, dir.join(normalized_file_name(year))))
        .collect()
}

fn corrupt(year: i32, reason: impl Into<String>) -> SummaryError {
    SummaryError::Corrupt {
        year,
        reason: reason.into(),
    }
}

/// Read one artifact and run the sanity checks
pub fn summarize_year(year: i32, path: &Path) -> Result<YearSummary, SummaryError> {
    if !path.is_file() {
        return Err(SummaryError::Missing { year });
    }
    let bytes = std::fs::metadata(path)?.len();
    let builder = ParquetRecordBatchReaderBuilder::try_new(std::fs::File::open(path)?)?;

    let file_metadata = builder.metadata().file_metadata();
    let lookup = |key: &str| {
        file_metadata
            .key_value_metadata()
            .and_then(|kv| kv.iter().find(|e| e.key == key))
            .and_then(|e| e.value.clone())
    };
    if let Some(recorded) = lookup(META_YEAR).and_then(|v| v.parse::<i32>().ok()) {
        if recorded != year {
            return Err(corrupt(year, format!("footer records year {}", recorded)));
        }
    }
    let dropped_rows = lookup(META_DROPPED_ROWS).and_then(|v| v.parse::<usize>().ok());

    let schema = builder.schema().clone();
    let positions: Vec<usize> = IDENTIFIER_COLUMNS
        .iter()
        .map(|name| {
            schema
                .index_of(name)
                .map_err(|_| corrupt(year, format!("missing {} column", name)))
        })
        .collect::<Result<_, _>>()?;
    let columns = schema.fields().len();

    let expected = reporting_period(year)
        .map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
        .ok_or_else(|| corrupt(year, "year has no reporting period"))?;

    let mask = ProjectionMask::roots(builder.parquet_schema(), positions);
    let reader = builder.with_projection(mask).build()?;

    let mut summary = YearSummary {
        year,
        rows: 0,
        columns,
        variables: columns.saturating_sub(IDENTIFIER_COLUMNS.len()),
        null_certificates: 0,
        negative_certificates: 0,
        period_mismatches: 0,
        dropped_rows,
        bytes,
    };

    for batch in reader {
        let batch = batch?;
        summary.rows += batch.num_rows();

        let certs = batch
            .column_by_name(CERT_COLUMN)
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| corrupt(year, "CERT is not a 64-bit integer column"))?;
        summary.null_certificates += certs.null_count();
        summary.negative_certificates += certs.iter().flatten().filter(|&c| c < 0).count();

        let periods = batch
            .column_by_name(REPORTING_PERIOD_COLUMN)
            .and_then(|c| c.as_any().downcast_ref::<Date32Array>())
            .ok_or_else(|| corrupt(year, "REPORTING_PERIOD is not a date column"))?;
        summary.period_mismatches += periods.iter().filter(|p| *p != Some(expected)).count();
    }

    debug!(year, rows = summary.rows, columns, "Summarized artifact");
    Ok(summary)
}

/// Summarize a set of artifacts in parallel
pub struct Summarizer {
    workers: usize,
}

impl Default for Summarizer {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

impl Summarizer {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Build a report keyed by year. Missing, unreadable, or unsound
    /// artifacts become failure entries.
    pub fn summarize(&self, artifacts: &[(i32, PathBuf)]) -> PipelineReport {
        let check = |(year, path): &(i32, PathBuf)| {
            let outcome = summarize_year(*year, path).and_then(|summary| {
                let issues = summary.issues();
                if issues.is_empty() {
                    Ok(summary)
                } else {
                    Err(corrupt(*year, issues.join("; ")))
                }
            });
            match outcome {
                Ok(summary) => YearEntry::Verified(summary),
                Err(e) => {
                    warn!(year, error = %e, "Verification failed");
                    YearEntry::Failed(YearFailure::summarize(*year, &e))
                },
            }
        };

        let entries: Vec<YearEntry> = if self.workers <= 1 {
            artifacts.iter().map(check).collect()
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
            {
                Ok(pool) => pool.install(|| artifacts.par_iter().map(check).collect()),
                Err(e) => {
                    warn!(error = %e, "Could not build worker pool, summarizing sequentially");
                    artifacts.iter().map(check).collect()
                },
            }
        };

        let mut report = PipelineReport::default();
        for entry in entries {
            report.insert(entry);
        }
        info!(
            verified = report.succeeded(),
            failed = report.failed(),
            "Summary complete"
        );
        report
    }
}
