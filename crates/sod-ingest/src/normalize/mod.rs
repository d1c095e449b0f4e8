//! Record normalizer
//!
//! Turns one year's raw artifact into the canonical Parquet file:
//!
//! 1. decode the whole file as UTF-8, or as Latin-1 if that fails
//! 2. upper-case and de-duplicate headers
//! 3. coerce `CERT` to a non-negative integer, dropping rows that fail
//! 4. inject `REPORTING_PERIOD` = June 30 of the year
//! 5. order columns `CERT`, `REPORTING_PERIOD`, then alphabetically
//! 6. attach registry descriptions and write `<out>/<year>.parquet`
//!
//! Years share nothing, so [`Normalizer::normalize_all`] fans them out over
//! a rayon pool bounded by the worker count.

pub mod decode;
pub mod table;
pub mod writer;

use crate::archive::extract_first_csv;
use crate::artifact::is_present;
use crate::error::{ParseError, YearFailure};
use crate::progress::create_year_progress;
use crate::schema::SchemaRegistry;
use decode::decode_text;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;
use serde::Serialize;
use sod_common::checksum::sha256_file;
use sod_common::types::{normalized_file_name, YearStatus, YearUnit};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use writer::{write_parquet, ArtifactMetadata};

/// A written (or reused) canonical artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalArtifact {
    pub year: i32,
    pub path: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub source_rows: usize,
    pub dropped_rows: usize,
    pub encoding: Option<String>,
    pub sha256: String,
    pub skipped: bool,
}

#[derive(Debug, Default)]
pub struct NormalizeReport {
    pub artifacts: Vec<CanonicalArtifact>,
    pub failures: Vec<YearFailure>,
}

impl NormalizeReport {
    pub fn succeeded(&self) -> usize {
        self.artifacts.len()
    }
}

/// Find the raw artifact for `year` under `raw_dir`
///
/// Checked in order: `ALL_<y>.csv`, `sod-<y>.csv`, `sod-<y>.zip`,
/// `ALL_<y>.zip`.
pub fn locate_raw_artifact(raw_dir: &Path, year: i32) -> Option<PathBuf> {
    [
        format!("ALL_{}.csv", year),
        format!("sod-{}.csv", year),
        format!("sod-{}.zip", year),
        format!("ALL_{}.zip", year),
    ]
    .into_iter()
    .map(|name| raw_dir.join(name))
    .find(|path| is_present(path))
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

pub struct Normalizer {
    registry: Arc<dyn SchemaRegistry>,
    output_dir: PathBuf,
    workers: usize,
    force: bool,
    show_progress: bool,
}

impl Normalizer {
    pub fn new(registry: Arc<dyn SchemaRegistry>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            output_dir: output_dir.into(),
            workers: 1,
            force: false,
            show_progress: false,
        }
    }

    /// Worker threads for [`Self::normalize_all`]; 1 processes years
    /// sequentially on the calling thread
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn output_path(&self, year: i32) -> PathBuf {
        self.output_dir.join(normalized_file_name(year))
    }

    /// Normalize one raw artifact into `<output_dir>/<year>.parquet`
    pub fn normalize(&self, raw: &Path, year: i32) -> Result<CanonicalArtifact, ParseError> {
        let output = self.output_path(year);
        if !self.force && is_present(&output) {
            info!(year, path = %output.display(), "Canonical artifact exists, skipping");
            return existing_artifact(year, &output);
        }

        if !is_present(raw) {
            return Err(ParseError::MissingRawArtifact { year });
        }

        let start = Instant::now();
        let bytes = if is_zip(raw) {
            let data = std::fs::read(raw)?;
            extract_first_csv(&data)
                .map_err(|source| ParseError::ArchiveFormat { year, source })?
                .contents
        } else {
            std::fs::read(raw)?
        };

        let (text, encoding) = decode_text(bytes);
        if encoding != decode::TextEncoding::Utf8 {
            warn!(year, encoding = %encoding, "Raw artifact is not valid UTF-8, decoded as Latin-1");
        }

        let parsed = table::parse_rows(year, &text, encoding)?;
        drop(text);
        let batch = table::build_batch(&parsed, self.registry.as_ref())?;

        let metadata = ArtifactMetadata {
            year,
            source_rows: parsed.source_rows,
            dropped_rows: parsed.dropped.total(),
            encoding: encoding.to_string(),
        };
        write_parquet(&batch, &metadata, &output)?;

        let artifact = CanonicalArtifact {
            year,
            path: output.clone(),
            rows: batch.num_rows(),
            columns: batch.num_columns(),
            source_rows: parsed.source_rows,
            dropped_rows: parsed.dropped.total(),
            encoding: Some(encoding.to_string()),
            sha256: sha256_file(&output)?,
            skipped: false,
        };

        info!(
            year,
            rows = artifact.rows,
            variables = artifact.columns.saturating_sub(2),
            dropped = artifact.dropped_rows,
            encoding = %encoding,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Normalized year"
        );
        Ok(artifact)
    }

    fn normalize_unit(&self, year: i32, raw_path: &Path) -> Result<CanonicalArtifact, ParseError> {
        let raw = if is_present(raw_path) {
            raw_path.to_path_buf()
        } else {
            let dir = raw_path.parent().unwrap_or_else(|| Path::new("."));
            locate_raw_artifact(dir, year).unwrap_or_else(|| raw_path.to_path_buf())
        };
        self.normalize(&raw, year)
    }

    /// Normalize every unit that has not failed
    ///
    /// Results are applied to `units` on the calling thread after all
    /// workers finish.
    pub fn normalize_all(&self, units: &mut [YearUnit]) -> NormalizeReport {
        let jobs: Vec<(usize, i32, PathBuf)> = units
            .iter()
            .enumerate()
            .filter(|(_, u)| !u.is_failed())
            .map(|(i, u)| (i, u.year, u.raw_path.clone()))
            .collect();

        let progress = create_year_progress(jobs.len() as u64, "Normalizing", self.show_progress);
        let run = |job: &(usize, i32, PathBuf)| {
            let result = self.normalize_unit(job.1, &job.2);
            progress.inc(1);
            (job.0, result)
        };

        let results: Vec<(usize, Result<CanonicalArtifact, ParseError>)> = if self.workers <= 1 {
            jobs.iter().map(run).collect()
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
            {
                Ok(pool) => pool.install(|| jobs.par_iter().map(run).collect()),
                Err(e) => {
                    warn!(error = %e, "Could not build worker pool, normalizing sequentially");
                    jobs.iter().map(run).collect()
                },
            }
        };
        progress.finish_and_clear();

        let mut report = NormalizeReport::default();
        for (idx, result) in results {
            let unit = &mut units[idx];
            match result {
                Ok(artifact) => {
                    unit.advance(YearStatus::Parsed);
                    report.artifacts.push(artifact);
                },
                Err(e) => {
                    error!(year = unit.year, error = %e, "Normalization failed");
                    unit.fail();
                    report.failures.push(YearFailure::normalize(unit.year, &e));
                },
            }
        }
        report.artifacts.sort_by_key(|a| a.year);
        report.failures.sort_by_key(|f| f.year);

        info!(
            succeeded = report.succeeded(),
            failed = report.failures.len(),
            workers = self.workers,
            "Normalize stage complete"
        );
        report
    }
}

/// Describe an already-written artifact from its footer
fn existing_artifact(year: i32, path: &Path) -> Result<CanonicalArtifact, ParseError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(std::fs::File::open(path)?)?;
    let metadata = builder.metadata().file_metadata();
    let lookup = |key: &str| {
        metadata
            .key_value_metadata()
            .and_then(|kv| kv.iter().find(|e| e.key == key))
            .and_then(|e| e.value.clone())
    };

    Ok(CanonicalArtifact {
        year,
        path: path.to_path_buf(),
        rows: metadata.num_rows().max(0) as usize,
        columns: builder.schema().fields().len(),
        source_rows: lookup(writer::META_SOURCE_ROWS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        dropped_rows: lookup(writer::META_DROPPED_ROWS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        encoding: lookup(writer::META_ENCODING),
        sha256: sha256_file(path)?,
        skipped: true,
    })
}
