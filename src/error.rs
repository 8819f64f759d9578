// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Tally
//!
//! Missing data is never an error: absent files aggregate as zeros. The
//! variants below cover what a caller can actually act on.

use chrono::NaiveDate;
use thiserror::Error;

/// Result type alias for Tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Main error type for Tally operations
#[derive(Error, Debug)]
pub enum TallyError {
    /// Underlying file system error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Flat file could not be read or written as CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Nested JSON column, heatmap grid or config could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Requested date range is inverted
    #[error("Invalid range: from {from} is after to {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },

    /// Entity id not known to the registry
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Metric family name could not be parsed
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Configuration value out of bounds
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request arguments that select nothing meaningful
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed row in a flat file
    #[error("Corrupt row at line {line}: {message}")]
    CorruptRow { line: u64, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TallyError::InvalidRange {
            from: NaiveDate::from_ymd_opt(2020, 9, 22).unwrap(),
            to: NaiveDate::from_ymd_opt(2020, 9, 19).unwrap(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("2020-09-22"));
        assert!(msg.contains("2020-09-19"));
    }

    #[test]
    fn test_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TallyError = io.into();
        assert!(matches!(err, TallyError::Io(_)));
    }
}
