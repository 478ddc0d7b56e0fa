//! Custom error types for the logger.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle everything that can go wrong between the serial port and the CSV files.
//!
//! ## Error Hierarchy
//!
//! `DaqError` groups failures by how far they are allowed to travel:
//!
//! - **Configuration** (`Config`, `Configuration`): the settings file could not be
//!   parsed or describes an impossible setup. Fatal, reported before acquisition.
//! - **Transport-fatal** (`Connection`, `SerialPortNotConnected`,
//!   `SerialFeatureDisabled`): the instrument cannot be reached. The run aborts.
//! - **Read-transient** (`SerialTimeout`, `Parse`) and **mapping-transient**
//!   (`MissingSample`): one acquisition cycle is unusable. The cycle is skipped.
//! - **Storage** (`Storage`, `Io`, `Csv`): a destination could not be written or
//!   read. `SaveGroup` turns these into fallbacks and log lines.
//! - **`HeaderMismatch`**: an existing CSV file disagrees with the configured
//!   channel set. Raised, never coerced.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! so the `?` operator works throughout the crate.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure the acquisition and logging pipeline can report.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The configuration sources could not be parsed or merged.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration parsed but describes an invalid setup.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Generic I/O failure not tied to a specific destination.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The transport could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation needed an open transport but there was none.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// The response terminator did not arrive in time.
    #[error("Serial read timeout after {0:?}")]
    SerialTimeout(Duration),

    /// The binary was built without serial support.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// The instrument response was empty or held a non-numeric field.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The instrument returned fewer samples than the scan list requires.
    #[error("Missing sample: channel index {index} but only {len} samples returned")]
    MissingSample {
        /// Logical index the channel expected.
        index: usize,
        /// Number of samples actually returned.
        len: usize,
    },

    /// A read was requested before `configure_channels` succeeded.
    #[error("Instrument channels have not been configured")]
    NotConfigured,

    /// Writing to or reading from a specific file failed.
    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An existing CSV header does not match the fields about to be written.
    #[error("Header mismatch in {}: expected {expected:?}, file has {found:?}", path.display())]
    HeaderMismatch {
        /// File whose header disagrees.
        path: PathBuf,
        /// Field names this write would produce.
        expected: Vec<String>,
        /// Field names present in the file.
        found: Vec<String>,
    },
}

impl DaqError {
    /// Wraps an I/O error together with the path it occurred on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DaqError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors that only invalidate the current acquisition cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DaqError::SerialTimeout(_) | DaqError::Parse(_) | DaqError::MissingSample { .. }
        )
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Parse("non-numeric field 'abc'".to_string());
        assert_eq!(err.to_string(), "Parse error: non-numeric field 'abc'");
    }

    #[test]
    fn test_transient_classification() {
        assert!(DaqError::Parse("empty".into()).is_transient());
        assert!(DaqError::MissingSample { index: 3, len: 2 }.is_transient());
        assert!(DaqError::SerialTimeout(Duration::from_secs(15)).is_transient());
        assert!(!DaqError::SerialPortNotConnected.is_transient());
        assert!(!DaqError::Connection("COM6".into()).is_transient());
    }

    #[test]
    fn test_header_mismatch_names_file() {
        let err = DaqError::HeaderMismatch {
            path: PathBuf::from("MagField 2024-01-15.csv"),
            expected: vec!["date".into(), "time".into(), "A".into()],
            found: vec!["date".into(), "time".into(), "B".into()],
        };
        assert!(err.to_string().contains("MagField 2024-01-15.csv"));
    }
}
