//! Subcommand execution
//!
//! Each command returns `Ok(true)` when every year it touched succeeded,
//! `Ok(false)` when at least one year failed, and `Err` when the batch could
//! not run at all.

use crate::cli::{Cli, Command};
use crate::config::PipelineConfig;
use crate::download::DownloadReport;
use crate::error::YearFailure;
use crate::normalize::{locate_raw_artifact, NormalizeReport};
use crate::pipeline::Pipeline;
use crate::progress::format_bytes;
use crate::schema::export_dictionary;
use crate::summarize::{write_summary_csv, PipelineReport};
use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::io::IsTerminal;
use tracing::{info, warn};

pub async fn execute(cli: &Cli) -> Result<bool> {
    let (start, end) = cli.resolve_years()?;
    let config = cli.apply(PipelineConfig::from_env()?)?;
    let pipeline = Pipeline::connect(config)
        .await?
        .with_progress(std::io::stderr().is_terminal());

    info!(command = cli.command.as_str(), start, end, "Starting");
    let ok = match cli.command {
        Command::Download => download(&pipeline, start, end).await?,
        Command::Parse => parse(&pipeline, start, end).await?,
        Command::Summarize => report(cli, pipeline.summarize(start, end).await?)?,
        Command::Run => report(cli, pipeline.run(start, end).await?)?,
    };

    if let Some(path) = &cli.dictionary {
        if pipeline.registry().is_empty() {
            warn!(path = %path.display(), "Field registry is empty, dictionary has no entries");
        }
        let written = export_dictionary(pipeline.registry(), path)
            .with_context(|| format!("Failed to export dictionary to {}", path.display()))?;
        println!(
            "{} Wrote {} field definitions to {}",
            "✓".green(),
            written,
            path.display()
        );
    }

    Ok(ok)
}

async fn download(pipeline: &Pipeline, start: i32, end: i32) -> Result<bool> {
    let mut units = pipeline.units(start, end)?;
    let report = pipeline.download(&mut units).await;
    print_downloads(&report);
    print_failures(&report.failures);
    Ok(report.failures.is_empty())
}

async fn parse(pipeline: &Pipeline, start: i32, end: i32) -> Result<bool> {
    let raw_dir = &pipeline.config().raw_dir;
    let units: Vec<_> = pipeline
        .units(start, end)?
        .into_iter()
        .filter(|unit| {
            let found = locate_raw_artifact(raw_dir, unit.year).is_some();
            if !found {
                warn!(year = unit.year, "No raw artifact, skipping");
            }
            found
        })
        .collect();
    if units.is_empty() {
        bail!(
            "No raw artifacts for {}-{} in {}",
            start,
            end,
            raw_dir.display()
        );
    }

    let (_, report) = pipeline.normalize(units).await?;
    print_normalized(&report);
    print_failures(&report.failures);
    Ok(report.failures.is_empty())
}

fn report(cli: &Cli, report: PipelineReport) -> Result<bool> {
    println!("{}", report.render());
    if let Some(path) = &cli.summary_csv {
        write_summary_csv(&report, path)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        println!("{} Wrote summary to {}", "✓".green(), path.display());
    }
    print_failures(&report.failures().cloned().collect::<Vec<_>>());
    Ok(report.is_success())
}

fn print_downloads(report: &DownloadReport) {
    for artifact in &report.artifacts {
        let detail = match (artifact.skipped, artifact.records) {
            (true, _) => "cached".to_string(),
            (false, Some(records)) => format!("{} records", records),
            (false, None) => artifact.strategy.to_string(),
        };
        println!(
            "{} {} {} ({})",
            "✓".green(),
            artifact.year,
            format_bytes(artifact.bytes),
            detail.dimmed()
        );
    }
}

fn print_normalized(report: &NormalizeReport) {
    for artifact in &report.artifacts {
        let detail = if artifact.skipped {
            "cached".to_string()
        } else {
            format!("{} dropped", artifact.dropped_rows)
        };
        println!(
            "{} {} {} rows, {} columns ({})",
            "✓".green(),
            artifact.year,
            artifact.rows,
            artifact.columns,
            detail.dimmed()
        );
    }
}

fn print_failures(failures: &[YearFailure]) {
    if failures.is_empty() {
        return;
    }
    for failure in failures {
        eprintln!("{} {}", "✗".red(), failure);
    }
    let years: Vec<String> = failures.iter().map(|f| f.year.to_string()).collect();
    eprintln!(
        "{} {} year(s) failed: {}",
        "✗".red().bold(),
        failures.len(),
        years.join(", ")
    );
}
