//! Error taxonomy for the acquisition and normalization pipeline
//!
//! Errors are absorbed at the smallest unit that can handle them: a bad row
//! is counted and dropped inside the normalizer, a failed year becomes a
//! [`YearFailure`], and only batch-wide problems (an unusable schema
//! registry, an invalid configuration) surface from the CLI as fatal.

use serde::Serialize;
use thiserror::Error;

/// Result type for HTTP fetches
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Outcome of an HTTP fetch that did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// 5xx, 429, timeouts and connection failures, after retries ran out
    #[error("Transient failure fetching {url} after {attempts} attempt(s): {reason}")]
    Transient {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// 4xx (other than 429) or a request that could not be built
    #[error("Permanent failure fetching {url}: {reason}")]
    Permanent {
        url: String,
        status: Option<u16>,
        reason: String,
    },
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Transient { .. } => FailureKind::Transient,
            FetchError::Permanent { .. } => FailureKind::Permanent,
        }
    }
}

/// Errors reading a bulk zip archive
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Unreadable zip archive: {0}")]
    Corrupt(String),

    #[error("No CSV entry in archive (entries: {entries:?})")]
    MissingCsv { entries: Vec<String> },

    #[error("IO error reading archive entry: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-year download failure
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Archive for {year} has an unexpected layout: {source}")]
    ArchiveFormat {
        year: i32,
        #[source]
        source: ArchiveError,
    },

    #[error("Archive for {year} is empty")]
    EmptyArchive { year: i32 },

    #[error("No records available for {year}")]
    NoRecords { year: i32 },

    #[error("Malformed API response for {year}: {reason}")]
    InvalidResponse { year: i32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Common(#[from] sod_common::SodError),
}

impl DownloadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DownloadError::Fetch(e) => e.kind(),
            DownloadError::ArchiveFormat { .. } | DownloadError::EmptyArchive { .. } => {
                FailureKind::ArchiveFormat
            },
            DownloadError::NoRecords { .. } => FailureKind::NoRecords,
            DownloadError::InvalidResponse { .. } => FailureKind::Permanent,
            DownloadError::Io(_) | DownloadError::Csv(_) | DownloadError::Common(_) => {
                FailureKind::Io
            },
        }
    }
}

/// Per-year normalization failure
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("No raw artifact found for {year}")]
    MissingRawArtifact { year: i32 },

    #[error("CERT column not found in data for {year}")]
    MissingCertificate { year: i32 },

    #[error("No valid rows for {year} ({dropped} dropped)")]
    NoValidRows { year: i32, dropped: usize },

    #[error("Archive for {year} has an unexpected layout: {source}")]
    ArchiveFormat {
        year: i32,
        #[source]
        source: ArchiveError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow conversion error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Common(#[from] sod_common::SodError),
}

impl ParseError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ParseError::MissingRawArtifact { .. } => FailureKind::MissingArtifact,
            ParseError::ArchiveFormat { .. } => FailureKind::ArchiveFormat,
            ParseError::Io(_) | ParseError::Common(_) => FailureKind::Io,
            ParseError::MissingCertificate { .. }
            | ParseError::NoValidRows { .. }
            | ParseError::Csv(_)
            | ParseError::Arrow(_)
            | ParseError::Parquet(_) => FailureKind::Parse,
        }
    }
}

/// Per-year verification failure
#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("No normalized artifact for {year}")]
    Missing { year: i32 },

    #[error("Corrupt artifact for {year}: {reason}")]
    Corrupt { year: i32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet read error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow read error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
}

impl SummaryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SummaryError::Missing { .. } => FailureKind::MissingArtifact,
            SummaryError::Io(_) | SummaryError::Csv(_) => FailureKind::Io,
            SummaryError::Corrupt { .. } | SummaryError::Parquet(_) | SummaryError::Arrow(_) => {
                FailureKind::Corrupt
            },
        }
    }
}

/// Errors loading or exporting the field registry
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Schema document is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Schema document has no properties.data.properties section")]
    MissingProperties,

    #[error("Schema cache error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
}

/// Classification carried by a [`YearFailure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
    ArchiveFormat,
    NoRecords,
    Parse,
    MissingArtifact,
    Corrupt,
    Io,
}

impl FailureKind {
    pub fn as_str(&self) -> &str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::ArchiveFormat => "archive_format",
            FailureKind::NoRecords => "no_records",
            FailureKind::Parse => "parse",
            FailureKind::MissingArtifact => "missing_artifact",
            FailureKind::Corrupt => "corrupt",
            FailureKind::Io => "io",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Normalize,
    Summarize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Download => f.write_str("download"),
            Stage::Normalize => f.write_str("normalize"),
            Stage::Summarize => f.write_str("summarize"),
        }
    }
}

/// The externally visible unit of failure. One year failing never aborts
/// its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearFailure {
    pub year: i32,
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

impl YearFailure {
    pub fn new(year: i32, stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            year,
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn download(year: i32, err: &DownloadError) -> Self {
        Self::new(year, Stage::Download, err.kind(), err.to_string())
    }

    pub fn normalize(year: i32, err: &ParseError) -> Self {
        Self::new(year, Stage::Normalize, err.kind(), err.to_string())
    }

    pub fn summarize(year: i32, err: &SummaryError) -> Self {
        Self::new(year, Stage::Summarize, err.kind(), err.to_string())
    }
}

impl std::fmt::Display for YearFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} failed ({}): {}", self.year, self.stage, self.kind, self.message)
    }
}
