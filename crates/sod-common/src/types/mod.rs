//! Domain types shared by the downloader, normalizer, and summarizer

use crate::error::{Result, SodError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// First year published by the Summary of Deposits survey
pub const FIRST_YEAR: i32 = 1987;

/// Last year supported by the pipeline
pub const LAST_YEAR: i32 = 2025;

/// Last year served only as a bulk archive; later years come from the API
pub const BULK_ARCHIVE_CUTOFF: i32 = 1993;

/// Certificate identifier column
pub const CERT_COLUMN: &str = "CERT";

/// Derived reporting-period column
pub const REPORTING_PERIOD_COLUMN: &str = "REPORTING_PERIOD";

/// Identifier columns, always emitted first and in this order
pub const IDENTIFIER_COLUMNS: [&str; 2] = [CERT_COLUMN, REPORTING_PERIOD_COLUMN];

/// June 30 of the given year, the SOD reporting date
pub fn reporting_period(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 6, 30)
}

/// Check that a year falls inside [`FIRST_YEAR`]..=[`LAST_YEAR`]
pub fn validate_year(year: i32) -> Result<i32> {
    if (FIRST_YEAR..=LAST_YEAR).contains(&year) {
        Ok(year)
    } else {
        Err(SodError::YearOutOfRange {
            year,
            first: FIRST_YEAR,
            last: LAST_YEAR,
        })
    }
}

/// Acquisition strategy for a year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStrategy {
    /// Legacy zipped CSV from the FOIA bulk download location
    BulkArchive,
    /// Offset/limit paging through the Banks API
    PaginatedApi,
}

impl SourceStrategy {
    /// Select the strategy by year threshold
    pub fn for_year(year: i32) -> Self {
        if year <= BULK_ARCHIVE_CUTOFF {
            SourceStrategy::BulkArchive
        } else {
            SourceStrategy::PaginatedApi
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceStrategy::BulkArchive => "bulk_archive",
            SourceStrategy::PaginatedApi => "paginated_api",
        }
    }

    /// File name of the raw artifact this strategy persists for `year`
    pub fn raw_file_name(&self, year: i32) -> String {
        match self {
            SourceStrategy::BulkArchive => format!("sod-{}.csv", year),
            SourceStrategy::PaginatedApi => format!("ALL_{}.csv", year),
        }
    }
}

impl std::fmt::Display for SourceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a [`YearUnit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearStatus {
    Pending,
    Downloaded,
    Parsed,
    Failed,
}

impl YearStatus {
    pub fn as_str(&self) -> &str {
        match self {
            YearStatus::Pending => "pending",
            YearStatus::Downloaded => "downloaded",
            YearStatus::Parsed => "parsed",
            YearStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for YearStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomic unit of work: one survey year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearUnit {
    pub year: i32,
    pub strategy: SourceStrategy,
    pub raw_path: PathBuf,
    pub normalized_path: PathBuf,
    status: YearStatus,
}

impl YearUnit {
    /// Create a pending unit with year-keyed artifact paths
    pub fn new(year: i32, raw_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Self {
        let strategy = SourceStrategy::for_year(year);
        Self {
            year,
            strategy,
            raw_path: raw_dir.as_ref().join(strategy.raw_file_name(year)),
            normalized_path: output_dir.as_ref().join(normalized_file_name(year)),
            status: YearStatus::Pending,
        }
    }

    pub fn status(&self) -> YearStatus {
        self.status
    }

    /// Move the unit forward. Returns false, leaving the status untouched,
    /// when `next` would regress or the unit has already failed.
    pub fn advance(&mut self, next: YearStatus) -> bool {
        if self.status == YearStatus::Failed || next <= self.status {
            return false;
        }
        self.status = next;
        true
    }

    pub fn fail(&mut self) {
        self.status = YearStatus::Failed;
    }

    pub fn is_failed(&self) -> bool {
        self.status == YearStatus::Failed
    }
}

/// File name of the canonical artifact for `year`
pub fn normalized_file_name(year: i32) -> String {
    format!("{}.parquet", year)
}

/// Declared or inferred column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Date => "date",
        }
    }
}

impl std::str::FromStr for FieldType {
    type Err = SodError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "text" => Ok(FieldType::String),
            "integer" | "int" => Ok(FieldType::Integer),
            "number" | "float" | "double" => Ok(FieldType::Number),
            "date" | "datetime" => Ok(FieldType::Date),
            other => Err(SodError::config(format!("Unknown field type: {}", other))),
        }
    }
}

/// Name, description, and type of one canonical column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub field_type: Option<FieldType>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            field_type: None,
        }
    }

    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }
}

/// Expand an inclusive year range into pending units, one per year
pub fn year_units(
    start: i32,
    end: i32,
    raw_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
) -> Result<Vec<YearUnit>> {
    if start > end {
        return Err(SodError::InvalidYearRange { start, end });
    }
    validate_year(start)?;
    validate_year(end)?;

    Ok((start..=end)
        .map(|year| YearUnit::new(year, raw_dir.as_ref(), output_dir.as_ref()))
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_threshold() {
        assert_eq!(SourceStrategy::for_year(1987), SourceStrategy::BulkArchive);
        assert_eq!(SourceStrategy::for_year(1993), SourceStrategy::BulkArchive);
        assert_eq!(SourceStrategy::for_year(1994), SourceStrategy::PaginatedApi);
        assert_eq!(SourceStrategy::for_year(2025), SourceStrategy::PaginatedApi);
    }

    #[test]
    fn test_unit_paths_are_year_keyed() {
        let bulk = YearUnit::new(1990, "raw", "out");
        assert_eq!(bulk.raw_path, PathBuf::from("raw/sod-1990.csv"));
        assert_eq!(bulk.normalized_path, PathBuf::from("out/1990.parquet"));

        let api = YearUnit::new(2020, "raw", "out");
        assert_eq!(api.raw_path, PathBuf::from("raw/ALL_2020.csv"));
    }

    #[test]
    fn test_status_advances_monotonically() {
        let mut unit = YearUnit::new(2000, "raw", "out");
        assert_eq!(unit.status(), YearStatus::Pending);
        assert!(unit.advance(YearStatus::Downloaded));
        assert!(!unit.advance(YearStatus::Pending));
        assert!(unit.advance(YearStatus::Parsed));
        assert_eq!(unit.status(), YearStatus::Parsed);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut unit = YearUnit::new(2000, "raw", "out");
        unit.fail();
        assert!(!unit.advance(YearStatus::Downloaded));
        assert!(unit.is_failed());
    }

    #[test]
    fn test_year_units_range() {
        let units = year_units(1987, 2025, "raw", "out").unwrap();
        assert_eq!(units.len(), 39);
        assert_eq!(units.first().unwrap().year, 1987);
        assert_eq!(units.last().unwrap().year, 2025);

        assert!(matches!(
            year_units(2000, 1999, "raw", "out"),
            Err(SodError::InvalidYearRange { .. })
        ));
        assert!(matches!(
            year_units(1980, 1990, "raw", "out"),
            Err(SodError::YearOutOfRange { year: 1980, .. })
        ));
    }

    #[test]
    fn test_reporting_period_is_june_30() {
        let date = reporting_period(1999).unwrap();
        assert_eq!(date.to_string(), "1999-06-30");
    }

    #[test]
    fn test_field_type_from_str() {
        assert_eq!("STRING".parse::<FieldType>().unwrap(), FieldType::String);
        assert_eq!("number".parse::<FieldType>().unwrap(), FieldType::Number);
        assert!("blob".parse::<FieldType>().is_err());
    }
}
