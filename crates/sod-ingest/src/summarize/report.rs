//! Pipeline report, table rendering, and CSV export

use super::YearSummary;
use crate::artifact::write_atomic;
use crate::error::{SummaryError, YearFailure};
use crate::progress::format_bytes;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Outcome for one year
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum YearEntry {
    Verified(YearSummary),
    Failed(YearFailure),
}

impl YearEntry {
    pub fn year(&self) -> i32 {
        match self {
            YearEntry::Verified(s) => s.year,
            YearEntry::Failed(f) => f.year,
        }
    }
}

/// Aggregate outcome across all years, ascending by year
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    entries: BTreeMap<i32, YearEntry>,
}

/// Cross-year statistics over verified years
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallStats {
    pub years: usize,
    pub first_year: i32,
    pub last_year: i32,
    pub total_rows: usize,
    pub min_rows: usize,
    pub max_rows: usize,
    pub mean_rows: f64,
    pub min_variables: usize,
    pub max_variables: usize,
    pub mean_variables: f64,
    pub total_bytes: u64,
}

impl PipelineReport {
    /// Record an entry; a failure replaces an earlier success for the same
    /// year, never the other way round
    pub fn insert(&mut self, entry: YearEntry) {
        let year = entry.year();
        match (self.entries.get(&year), &entry) {
            (Some(YearEntry::Failed(_)), YearEntry::Verified(_)) => {},
            _ => {
                self.entries.insert(year, entry);
            },
        }
    }

    pub fn record_failure(&mut self, failure: YearFailure) {
        self.insert(YearEntry::Failed(failure));
    }

    pub fn entries(&self) -> impl Iterator<Item = &YearEntry> {
        self.entries.values()
    }

    pub fn get(&self, year: i32) -> Option<&YearEntry> {
        self.entries.get(&year)
    }

    pub fn years(&self) -> Vec<i32> {
        self.entries.keys().copied().collect()
    }

    pub fn verified(&self) -> impl Iterator<Item = &YearSummary> {
        self.entries.values().filter_map(|e| match e {
            YearEntry::Verified(s) => Some(s),
            YearEntry::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &YearFailure> {
        self.entries.values().filter_map(|e| match e {
            YearEntry::Failed(f) => Some(f),
            YearEntry::Verified(_) => None,
        })
    }

    pub fn succeeded(&self) -> usize {
        self.verified().count()
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn failed_years(&self) -> Vec<i32> {
        self.failures().map(|f| f.year).collect()
    }

    /// Row count per verified year
    pub fn row_counts(&self) -> BTreeMap<i32, usize> {
        self.verified().map(|s| (s.year, s.rows)).collect()
    }

    /// True when at least one year was checked and none failed
    pub fn is_success(&self) -> bool {
        !self.entries.is_empty() && self.failed() == 0
    }

    pub fn overall(&self) -> Option<OverallStats> {
        let verified: Vec<&YearSummary> = self.verified().collect();
        let first = verified.first()?;
        let last = verified.last()?;
        let n = verified.len();

        let rows = verified.iter().map(|s| s.rows);
        let variables = verified.iter().map(|s| s.variables);
        let total_rows: usize = rows.clone().sum();
        let total_variables: usize = variables.clone().sum();

        Some(OverallStats {
            years: n,
            first_year: first.year,
            last_year: last.year,
            total_rows,
            min_rows: rows.clone().min().unwrap_or(0),
            max_rows: rows.max().unwrap_or(0),
            mean_rows: total_rows as f64 / n as f64,
            min_variables: variables.clone().min().unwrap_or(0),
            max_variables: variables.max().unwrap_or(0),
            mean_variables: total_variables as f64 / n as f64,
            total_bytes: verified.iter().map(|s| s.bytes).sum(),
        })
    }

    /// Per-year table followed by overall statistics
    pub fn render(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                "Year", "Status", "Rows", "Variables", "Dropped", "Size", "Notes",
            ]);

        for entry in self.entries() {
            match entry {
                YearEntry::Verified(s) => {
                    table.add_row(vec![
                        s.year.to_string(),
                        "ok".to_string(),
                        s.rows.to_string(),
                        s.variables.to_string(),
                        s.dropped_rows.map(|d| d.to_string()).unwrap_or_default(),
                        format_bytes(s.bytes),
                        String::new(),
                    ]);
                },
                YearEntry::Failed(f) => {
                    table.add_row(vec![
                        f.year.to_string(),
                        format!("failed ({})", f.stage),
                        String::new(),
                        String::new(),
                        String::new(),
                        String::new(),
                        format!("{}: {}", f.kind, f.message),
                    ]);
                },
            }
        }

        let mut out = table.to_string();
        if let Some(stats) = self.overall() {
            out.push_str(&format!(
                "\nYears verified: {} ({}-{})\n\
                 Rows: total {}, min {}, max {}, mean {:.0}\n\
                 Variables: min {}, max {}, mean {:.1}\n\
                 Total size: {}\n",
                stats.years,
                stats.first_year,
                stats.last_year,
                stats.total_rows,
                stats.min_rows,
                stats.max_rows,
                stats.mean_rows,
                stats.min_variables,
                stats.max_variables,
                stats.mean_variables,
                format_bytes(stats.total_bytes),
            ));
        }
        if self.failed() > 0 {
            out.push_str(&format!("Failed years: {:?}\n", self.failed_years()));
        }
        out
    }
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    year: i32,
    status: &'a str,
    rows: Option<usize>,
    variables: Option<usize>,
    columns: Option<usize>,
    null_certificates: Option<usize>,
    period_mismatches: Option<usize>,
    dropped_rows: Option<usize>,
    bytes: Option<u64>,
    error: &'a str,
}

/// Export one row per year to `path`
pub fn write_summary_csv(report: &PipelineReport, path: &Path) -> Result<(), SummaryError> {
    write_atomic(path, |w| {
        let mut csv = csv::Writer::from_writer(&mut *w);
        for entry in report.entries() {
            let row = match entry {
                YearEntry::Verified(s) => SummaryRow {
                    year: s.year,
                    status: "ok",
                    rows: Some(s.rows),
                    variables: Some(s.variables),
                    columns: Some(s.columns),
                    null_certificates: Some(s.null_certificates),
                    period_mismatches: Some(s.period_mismatches),
                    dropped_rows: s.dropped_rows,
                    bytes: Some(s.bytes),
                    error: "",
                },
                YearEntry::Failed(f) => SummaryRow {
                    year: f.year,
                    status: "failed",
                    rows: None,
                    variables: None,
                    columns: None,
                    null_certificates: None,
                    period_mismatches: None,
                    dropped_rows: None,
                    bytes: None,
                    error: &f.message,
                },
            };
            csv.serialize(row)?;
        }
        csv.flush()?;
        Ok::<(), SummaryError>(())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, Stage};
    use tempfile::TempDir;

    fn summary(year: i32, rows: usize, variables: usize) -> YearEntry {
        YearEntry::Verified(YearSummary {
            year,
            rows,
            columns: variables + 2,
            variables,
            null_certificates: 0,
            negative_certificates: 0,
            period_mismatches: 0,
            dropped_rows: Some(0),
            bytes: 1024,
        })
    }

    fn failure(year: i32) -> YearEntry {
        YearEntry::Failed(YearFailure::new(
            year,
            Stage::Download,
            FailureKind::ArchiveFormat,
            "no CSV entry",
        ))
    }

    #[test]
    fn test_entries_sorted_by_year() {
        let mut report = PipelineReport::default();
        report.insert(summary(2001, 10, 5));
        report.insert(failure(1990));
        report.insert(summary(1995, 20, 3));

        assert_eq!(report.years(), vec![1990, 1995, 2001]);
        assert_eq!(report.failed_years(), vec![1990]);
        assert_eq!(report.succeeded(), 2);
        assert!(!report.is_success());
    }

    #[test]
    fn test_failure_is_not_overwritten() {
        let mut report = PipelineReport::default();
        report.insert(failure(2000));
        report.insert(summary(2000, 10, 5));
        assert!(matches!(report.get(2000), Some(YearEntry::Failed(_))));
    }

    #[test]
    fn test_overall_stats() {
        let mut report = PipelineReport::default();
        report.insert(summary(2000, 10, 4));
        report.insert(summary(2001, 30, 6));
        report.insert(failure(2002));

        let stats = report.overall().unwrap();
        assert_eq!(stats.years, 2);
        assert_eq!((stats.first_year, stats.last_year), (2000, 2001));
        assert_eq!(stats.total_rows, 40);
        assert_eq!((stats.min_rows, stats.max_rows), (10, 30));
        assert_eq!(stats.mean_rows, 20.0);
        assert_eq!(stats.mean_variables, 5.0);
        assert_eq!(stats.total_bytes, 2048);

        assert!(PipelineReport::default().overall().is_none());
    }

    #[test]
    fn test_render_mentions_failures() {
        let mut report = PipelineReport::default();
        report.insert(summary(2000, 10, 4));
        report.insert(failure(1990));
        let text = report.render();
        assert!(text.contains("archive_format"));
        assert!(text.contains("Failed years: [1990]"));
        assert!(text.find("1990").unwrap() < text.find("2000").unwrap());
    }

    #[test]
    fn test_summary_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.csv");
        let mut report = PipelineReport::default();
        report.insert(summary(2000, 10, 4));
        report.insert(failure(1990));

        write_summary_csv(&report, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("year,status,rows"));
        assert!(lines[1].starts_with("1990,failed,"));
        assert!(lines[2].starts_with("2000,ok,10,4,6"));
    }
}
