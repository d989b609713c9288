use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("not a pdf ({path}): {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("text extraction failed ({path}): {reason}")]
    ExtractionFailure { path: PathBuf, reason: String },

    #[error("failed to write chunk record {record}: {source}")]
    WriteFailure {
        record: String,
        #[source]
        source: std::io::Error,
    },

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("document processing exceeded {0:?}")]
    Timeout(Duration),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl PipelineError {
    pub(crate) fn invalid_format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ExtractionFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly label used in logs and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidFormat { .. } => "invalid_format",
            Self::ExtractionFailure { .. } => "extraction_failure",
            Self::WriteFailure { .. } => "write_failure",
            Self::Timeout(_) => "timeout",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::RegexError(_) => "regex",
            Self::MissingFileName(_) => "missing_file_name",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Worker(_) => "worker",
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
