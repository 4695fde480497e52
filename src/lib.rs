//! asset_update - reconcile derivative photo/video renditions with the asset store
//!
//! Scans the photo and video trees, matches every rendition of an asset
//! across its variant directories, rebuilds missing thumbnails, reads capture
//! metadata from raw videos and emits an update script for the store.
//! External tools (`ffmpeg`, `exiftool`, `jpegoptim`) are shelled out to, never linked.

pub mod assemble;
pub mod config;
pub mod error;
pub mod image;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod process;
pub mod record;
pub mod scanner;
pub mod script;
pub mod video;

pub use crate::assemble::{assemble, derive_key, sibling_path, Assembly, AssemblyReport, KeyConflict};
pub use crate::config::{PipelineConfig, RegenerateMode};
pub use crate::error::{PipelineError, Result};
pub use crate::image::{CropPlan, OptimizerConfig, SquareThumbnailer, UnsharpMask};
pub use crate::metadata::{ExifTool, TagReader, TagSet, TagValue, VideoMetadata};
pub use crate::metrics::{PhaseSummary, RunSummary};
pub use crate::pipeline::{Pipeline, RunOutput};
pub use crate::pool::{CancelToken, Phase, PhaseOutcome, UnitFailure, WorkerPool};
pub use crate::process::{ProcessFailure, ProcessOutcome, ProcessOutput, ProcessRunner, SystemRunner, ToolCommand};
pub use crate::record::{AssetRecord, MediaRecord, PhotoAsset, PhotoVariant, Variant, VideoAsset, VideoVariant};
pub use crate::video::{VideoConfig, VideoThumbnailer, VideoThumbnails};
