//! Error types shared by every pipeline stage.
//!
//! `PipelineError` covers failures that stop one unit of work (a file, a
//! station-year, or the whole run when a directory is unusable).
//! `SkipReason` covers the recoverable stitching conditions that are logged
//! and then stepped over.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// One run file could not be turned into a daily series.
    #[error("malformed run file {path}: {reason}")]
    MalformedRunFile { path: PathBuf, reason: String },

    #[error("invalid run identifier '{0}'")]
    InvalidRunId(String),

    #[error("invalid station code '{0}': expected exactly 4 alphanumeric characters")]
    InvalidStation(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("metadata header error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A persisted table exists but does not follow the expected layout.
    #[error("bad table format in {path}: {reason}")]
    TableFormat { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unreadable or unwritable directory. Fatal, raised before processing.
    #[error("directory {path} is not usable: {reason}")]
    Directory { path: PathBuf, reason: String },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedRunFile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Why a stitch was stepped over. None of these abort processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The two series share no timestamp.
    NoOverlap,
    /// The shared span is shorter than the smoothing window.
    InsufficientOverlapLength { samples: usize, window: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoOverlap => write!(f, "no overlapping timestamps"),
            SkipReason::InsufficientOverlapLength { samples, window } => write!(
                f,
                "overlap of {} samples is shorter than smoothing window {}",
                samples, window
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = PipelineError::malformed("/data/tela0010.19d.tdp", "missing WetZ group");
        let msg = err.to_string();
        assert!(msg.contains("tela0010.19d.tdp"));
        assert!(msg.contains("missing WetZ group"));

        let skip = SkipReason::InsufficientOverlapLength { samples: 5, window: 25 };
        assert_eq!(
            skip.to_string(),
            "overlap of 5 samples is shorter than smoothing window 25"
        );
    }
}
