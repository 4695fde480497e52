//! Run configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::image::OptimizerConfig;

/// Which assets get their derived thumbnails rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegenerateMode {
    /// Skip the thumbnail phases.
    Off,
    /// Only assets lacking a square thumbnail (or still on a legacy preview).
    #[default]
    Missing,
    /// Every eligible asset.
    All,
}

impl std::str::FromStr for RegenerateMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(RegenerateMode::Off),
            "missing" => Ok(RegenerateMode::Missing),
            "all" => Ok(RegenerateMode::All),
            other => Err(format!("unknown regenerate mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub photo_root: PathBuf,
    pub video_root: PathBuf,
    /// Destination of the update script.
    pub output: PathBuf,
    pub workers: usize,
    pub process_timeout: Duration,
    pub regenerate: RegenerateMode,
    pub optimizer: Option<OptimizerConfig>,
    pub ffmpeg: String,
    pub exiftool: String,
    /// Path fragment where photo web paths begin.
    pub photo_web_marker: String,
    /// Path fragment where video web paths begin.
    pub video_web_marker: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            photo_root: PathBuf::new(),
            video_root: PathBuf::new(),
            output: PathBuf::new(),
            workers: 32,                                   // io and decode bound, not cpu bound
            process_timeout: Duration::from_secs(120),
            regenerate: RegenerateMode::Missing,
            optimizer: None,
            ffmpeg: "ffmpeg".to_string(),
            exiftool: "exiftool".to_string(),
            photo_web_marker: "/images/".to_string(),
            video_web_marker: "/movies/".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn new(photo_root: impl Into<PathBuf>, video_root: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            photo_root: photo_root.into(),
            video_root: video_root.into(),
            output: output.into(),
            ..Default::default()
        }
    }

    /// Check everything that must hold before any phase starts.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("photo root", &self.photo_root),
            ("video root", &self.video_root),
            ("output file", &self.output),
        ] {
            if path.as_os_str().to_string_lossy().trim().is_empty() {
                return Err(PipelineError::Configuration(format!("Missing {}", name)));
            }
        }

        for (name, path) in [("photo root", &self.photo_root), ("video root", &self.video_root)] {
            if !path.is_dir() {
                return Err(PipelineError::Configuration(format!(
                    "{} {} is not a directory",
                    name,
                    path.display()
                )));
            }
        }

        if self.workers == 0 {
            return Err(PipelineError::Configuration("workers must be at least 1".to_string()));
        }

        if self.process_timeout.is_zero() {
            return Err(PipelineError::Configuration("process timeout must be positive".to_string()));
        }

        for (name, tool) in [("ffmpeg", &self.ffmpeg), ("exiftool", &self.exiftool)] {
            if tool.trim().is_empty() {
                return Err(PipelineError::Configuration(format!("Missing {} executable", name)));
            }
        }

        Ok(())
    }
}
