//! Source downloader
//!
//! Selects the acquisition strategy per year from
//! [`SourceStrategy::for_year`] and persists exactly one raw artifact per
//! year:
//!
//! - paginated API years become `ALL_<year>.csv`
//! - bulk archive years become `sod-<year>.csv`, extracted from the zip
//!
//! A present, non-empty artifact is reused unless `force` is set, so an
//! interrupted batch resumes where it stopped.

pub mod api;
pub mod bulk;

use crate::artifact::{file_size, is_present, write_atomic, write_bytes_atomic};
use crate::config::{ApiConfig, BulkConfig, PipelineConfig};
use crate::error::{DownloadError, YearFailure};
use crate::http::RetryingClient;
use crate::progress::create_record_progress;
use serde::Serialize;
use sod_common::checksum::sha256_file;
use sod_common::types::{SourceStrategy, YearStatus, YearUnit};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A persisted raw artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub year: i32,
    pub strategy: SourceStrategy,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
    /// Records written; `None` for bulk CSVs and reused artifacts
    pub records: Option<usize>,
    /// True when an existing artifact was reused
    pub skipped: bool,
}

/// Outcome of a batch download
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub artifacts: Vec<ArtifactRef>,
    pub failures: Vec<YearFailure>,
}

impl DownloadReport {
    pub fn succeeded(&self) -> usize {
        self.artifacts.len()
    }

    pub fn failed_years(&self) -> Vec<i32> {
        self.failures.iter().map(|f| f.year).collect()
    }
}

pub struct Downloader {
    client: Arc<RetryingClient>,
    api: ApiConfig,
    bulk: BulkConfig,
    force: bool,
    show_progress: bool,
}

impl Downloader {
    pub fn new(client: Arc<RetryingClient>, api: ApiConfig, bulk: BulkConfig) -> Self {
        Self {
            client,
            api,
            bulk,
            force: false,
            show_progress: false,
        }
    }

    pub fn from_config(client: Arc<RetryingClient>, config: &PipelineConfig) -> Self {
        Self::new(client, config.api.clone(), config.bulk.clone()).with_force(config.force)
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Fetch one year with the given strategy into `destination`
    pub async fn download_year(
        &self,
        year: i32,
        strategy: SourceStrategy,
        destination: &Path,
    ) -> Result<ArtifactRef, DownloadError> {
        if !self.force && is_present(destination) {
            info!(year, path = %destination.display(), "Raw artifact exists, skipping download");
            return Self::artifact_ref(year, strategy, destination, None, true);
        }

        let records = match strategy {
            SourceStrategy::PaginatedApi => {
                let progress = create_record_progress(year, self.show_progress);
                let result = api::fetch_year(&self.client, &self.api, year, &progress).await;
                progress.finish_and_clear();

                let table = result?;
                if table.is_empty() {
                    return Err(DownloadError::NoRecords { year });
                }
                write_atomic(destination, |w| table.write_csv(w))?;
                Some(table.len())
            },
            SourceStrategy::BulkArchive => {
                let extracted = bulk::fetch_year(&self.client, &self.bulk, year).await?;
                write_bytes_atomic(destination, &extracted.contents)?;
                None
            },
        };

        Self::artifact_ref(year, strategy, destination, records, false)
    }

    fn artifact_ref(
        year: i32,
        strategy: SourceStrategy,
        path: &Path,
        records: Option<usize>,
        skipped: bool,
    ) -> Result<ArtifactRef, DownloadError> {
        let artifact = ArtifactRef {
            year,
            strategy,
            path: path.to_path_buf(),
            bytes: file_size(path)?,
            sha256: sha256_file(path)?,
            records,
            skipped,
        };
        if !skipped {
            info!(
                year,
                path = %artifact.path.display(),
                bytes = artifact.bytes,
                sha256 = %artifact.sha256,
                "Raw artifact written"
            );
        }
        Ok(artifact)
    }

    /// Download every pending unit in order. A failing year is recorded and
    /// marked failed; the batch continues.
    pub async fn download_all(&self, units: &mut [YearUnit]) -> DownloadReport {
        let mut report = DownloadReport::default();

        for unit in units.iter_mut() {
            if unit.is_failed() {
                continue;
            }

            match self
                .download_year(unit.year, unit.strategy, &unit.raw_path)
                .await
            {
                Ok(artifact) => {
                    unit.advance(YearStatus::Downloaded);
                    report.artifacts.push(artifact);
                },
                Err(e) => {
                    error!(year = unit.year, strategy = %unit.strategy, error = %e, "Download failed");
                    unit.fail();
                    report.failures.push(YearFailure::download(unit.year, &e));
                },
            }
        }

        if !report.failures.is_empty() {
            warn!(
                failed = report.failures.len(),
                years = ?report.failed_years(),
                "Some years failed to download"
            );
        }
        info!(
            succeeded = report.succeeded(),
            failed = report.failures.len(),
            "Download stage complete"
        );
        report
    }
}
