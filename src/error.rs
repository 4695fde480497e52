use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Decode failed for {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Encode failed for {path}: {reason}")]
    Encode { path: PathBuf, reason: String },

    #[error("{program} failed: {failure}")]
    ExternalProcess {
        program: String,
        failure: crate::process::ProcessFailure,
    },

    #[error("{program} timed out after {}s", .after.as_secs_f64())]
    Timeout { program: String, after: Duration },

    #[error("Duplicate key '{key}' in bucket '{bucket}': {}", display_paths(.paths))]
    DuplicateKey {
        bucket: String,
        key: String,
        paths: Vec<PathBuf>,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cancelled before start")]
    Cancelled,
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io { path: path.into(), source }
    }

    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Decode { path: path.into(), reason: reason.to_string() }
    }

    /// Short machine-friendly name used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Decode { .. } => "decode",
            PipelineError::Encode { .. } => "encode",
            PipelineError::ExternalProcess { .. } => "external_process",
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::DuplicateKey { .. } => "duplicate_key",
            PipelineError::Io { .. } => "io",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths.iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, PipelineError>;
