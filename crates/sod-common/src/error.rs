//! Error types shared across the SOD workspace

use thiserror::Error;

/// Result type alias for common SOD operations
pub type Result<T> = std::result::Result<T, SodError>;

/// Errors raised by the shared helpers in this crate
#[derive(Error, Debug)]
pub enum SodError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Year {year} is outside the supported range {first}-{last}")]
    YearOutOfRange { year: i32, first: i32, last: i32 },

    #[error("Invalid year range: start {start} is after end {end}")]
    InvalidYearRange { start: i32, end: i32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SodError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
