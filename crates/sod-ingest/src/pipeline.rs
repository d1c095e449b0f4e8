//! Stage orchestration
//!
//! Builds one [`YearUnit`] per requested year and moves it through
//! download, normalization, and verification. A unit that fails is marked
//! failed, skipped by later stages, and reported at the end.

use crate::config::PipelineConfig;
use crate::download::{DownloadReport, Downloader};
use crate::http::{Clock, RetryingClient, TokioClock};
use crate::normalize::{NormalizeReport, Normalizer};
use crate::schema::{FdicSchemaRegistry, SchemaRegistry};
use crate::summarize::{discover_artifacts, expected_artifacts, PipelineReport, Summarizer};
use anyhow::{Context, Result};
use sod_common::types::{year_units, YearUnit, REPORTING_PERIOD_COLUMN};
use std::sync::Arc;
use tracing::info;

pub struct Pipeline {
    config: PipelineConfig,
    client: Arc<RetryingClient>,
    registry: Arc<dyn SchemaRegistry>,
    show_progress: bool,
}

impl Pipeline {
    /// Assemble a pipeline from explicit collaborators
    ///
    /// When the registry knows fields and no subset was configured, the
    /// API is asked for exactly those fields.
    pub fn new(
        mut config: PipelineConfig,
        client: Arc<RetryingClient>,
        registry: Arc<dyn SchemaRegistry>,
    ) -> Self {
        if config.api.fields.is_none() && !registry.is_empty() {
            let fields: Vec<String> = registry
                .field_names()
                .into_iter()
                .filter(|name| name != REPORTING_PERIOD_COLUMN)
                .collect();
            if !fields.is_empty() {
                config.api.fields = Some(fields);
            }
        }

        Self {
            config,
            client,
            registry,
            show_progress: false,
        }
    }

    /// Build the HTTP client on the wall clock and resolve the registry.
    /// An unusable registry fails the whole batch.
    pub async fn connect(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let client = Arc::new(
            RetryingClient::new(
                config.retry.clone(),
                clock,
                config.timeout(),
                &config.user_agent,
            )
            .context("Failed to create HTTP client")?,
        );

        let registry = FdicSchemaRegistry::load(&client, &config.schema)
            .await
            .context("Field registry unavailable")?;
        info!(
            source = ?registry.source(),
            fields = registry.field_names().len(),
            "Field registry ready"
        );

        Ok(Self::new(config, client, Arc::new(registry)))
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &dyn SchemaRegistry {
        self.registry.as_ref()
    }

    pub fn units(&self, start: i32, end: i32) -> Result<Vec<YearUnit>> {
        Ok(year_units(start, end, &self.config.raw_dir, &self.config.output_dir)?)
    }

    fn downloader(&self) -> Downloader {
        Downloader::from_config(self.client.clone(), &self.config).with_progress(self.show_progress)
    }

    fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.registry.clone(), &self.config.output_dir)
            .with_workers(self.config.workers)
            .with_force(self.config.force)
            .with_progress(self.show_progress)
    }

    pub async fn download(&self, units: &mut [YearUnit]) -> DownloadReport {
        self.downloader().download_all(units).await
    }

    /// Normalize on the blocking pool so the runtime stays responsive
    pub async fn normalize(&self, units: Vec<YearUnit>) -> Result<(Vec<YearUnit>, NormalizeReport)> {
        let normalizer = self.normalizer();
        let mut units = units;
        tokio::task::spawn_blocking(move || {
            let report = normalizer.normalize_all(&mut units);
            (units, report)
        })
        .await
        .context("Normalization worker panicked")
    }

    /// Verify the canonical artifacts found in `start..=end`
    ///
    /// Years between the first and last artifact found that have no file
    /// are reported as missing.
    pub async fn summarize(&self, start: i32, end: i32) -> Result<PipelineReport> {
        let found: Vec<i32> = discover_artifacts(&self.config.output_dir)
            .with_context(|| {
                format!("Failed to read {}", self.config.output_dir.display())
            })?
            .into_iter()
            .map(|(year, _)| year)
            .filter(|year| (start..=end).contains(year))
            .collect();
        let (Some(&first), Some(&last)) = (found.iter().min(), found.iter().max()) else {
            anyhow::bail!(
                "No canonical artifacts for {}-{} in {}",
                start,
                end,
                self.config.output_dir.display()
            );
        };

        let summarizer = Summarizer::new(self.config.workers);
        let artifacts = expected_artifacts(&self.config.output_dir, first, last);
        tokio::task::spawn_blocking(move || summarizer.summarize(&artifacts))
            .await
            .context("Summary worker panicked")
    }

    /// Run all three stages. Years that failed earlier are reported with
    /// their earlier failure instead of being verified.
    pub async fn run(&self, start: i32, end: i32) -> Result<PipelineReport> {
        let mut units = self.units(start, end)?;
        info!(start, end, years = units.len(), "Starting pipeline");

        let downloads = self.download(&mut units).await;
        let (units, normalized) = self.normalize(units).await?;

        let verify: Vec<_> = units
            .iter()
            .filter(|u| !u.is_failed())
            .map(|u| (u.year, u.normalized_path.clone()))
            .collect();
        let summarizer = Summarizer::new(self.config.workers);
        let mut report = tokio::task::spawn_blocking(move || summarizer.summarize(&verify))
            .await
            .context("Summary worker panicked")?;

        for failure in downloads.failures.into_iter().chain(normalized.failures) {
            report.record_failure(failure);
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Pipeline finished"
        );
        Ok(report)
    }
}
