//! Video thumbnail regeneration via FFmpeg
//!
//! Per raw source video, strictly in order:
//! 1. grab a frame at 2s into the preview path (`thumbnails/<name>.jpg`)
//! 2. fit the preview into 240x160 and sharpen it in place
//! 3. grab a second frame into `thumb_sq/<name>.jpg` and turn it into the square thumbnail
//! 4. delete the legacy `thumbnails/<name>.png`, only once the new preview exists

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::assemble::sibling_path;
use crate::error::{PipelineError, Result};
use crate::image::{self as imaging, OptimizerConfig, SquareThumbnailer, UnsharpMask};
use crate::process::{ProcessRunner, ToolCommand};
use crate::record::{MediaRecord, Variant, VideoVariant};

pub struct VideoConfig {
    pub ffmpeg: String,
    /// Seek offset of the representative frame.
    pub frame_offset: String,
    pub preview_width: u32,
    pub preview_height: u32,
    pub extension: String,
    pub legacy_extension: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            frame_offset: "00:00:02".to_string(),
            preview_width: 240,
            preview_height: 160,
            extension: "jpg".to_string(),
            legacy_extension: "png".to_string(),
        }
    }
}

/// Files written for one video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoThumbnails {
    pub preview: MediaRecord,
    pub square: MediaRecord,
    pub legacy_removed: bool,
}

pub struct VideoThumbnailer<'a> {
    config: VideoConfig,
    square: SquareThumbnailer,
    runner: &'a dyn ProcessRunner,
    optimizer: Option<OptimizerConfig>,
}

impl<'a> VideoThumbnailer<'a> {
    pub fn new(config: VideoConfig, runner: &'a dyn ProcessRunner) -> Self {
        Self {
            config,
            square: SquareThumbnailer::default(),
            runner,
            optimizer: None,
        }
    }

    pub fn with_optimizer(mut self, optimizer: Option<OptimizerConfig>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Preview and square destinations for a raw source.
    pub fn destinations(&self, raw: &Path) -> Result<(PathBuf, PathBuf)> {
        let raw_dir = VideoVariant::Raw.dir_name();
        let ext = Some(self.config.extension.as_str());

        let preview = sibling_path(raw, raw_dir, VideoVariant::Thumb.dir_name(), ext);
        let square = sibling_path(raw, raw_dir, VideoVariant::ThumbSq.dir_name(), ext);

        match (preview, square) {
            (Some(preview), Some(square)) => Ok((preview, square)),
            _ => Err(PipelineError::Configuration(format!(
                "{} is not inside a '{}' directory",
                raw.display(),
                raw_dir
            ))),
        }
    }

    /// Run the whole state machine for one raw video.
    pub fn regenerate(&self, raw: &Path) -> Result<VideoThumbnails> {
        let (preview_path, square_path) = self.destinations(raw)?;

        self.extract_frame(raw, &preview_path)?;
        let (width, height) = self.fit_preview(&preview_path)?;
        self.optimize(&preview_path)?;

        self.extract_frame(raw, &square_path)?;
        let (sq_width, sq_height) = self.square.generate(&square_path, &square_path)?;
        self.optimize(&square_path)?;

        let legacy_removed = self.retire_legacy(&preview_path)?;

        Ok(VideoThumbnails {
            preview: stat(&preview_path)?.with_dimensions(width, height),
            square: stat(&square_path)?.with_dimensions(sq_width, sq_height),
            legacy_removed,
        })
    }

    /// Dump one frame at the configured offset.
    pub fn extract_frame(&self, video: &Path, image: &Path) -> Result<()> {
        if let Some(parent) = image.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        ToolCommand::new(self.config.ffmpeg.as_str())
            .args(&["-y", "-loglevel", "error"])
            .input(video)
            .args(&["-ss", &self.config.frame_offset, "-vframes", "1"])
            .output(image)
            .execute(self.runner)?;

        debug!("extracted frame {} -> {}", video.display(), image.display());
        Ok(())
    }

    /// Shrink the preview into the bounding box, sharpen, write back.
    fn fit_preview(&self, preview: &Path) -> Result<(u32, u32)> {
        let img = imaging::load(preview)?;
        let (width, height) = imaging::fit_within(
            img.width(),
            img.height(),
            self.config.preview_width,
            self.config.preview_height,
        );

        let scaled = imaging::scale(&img, width, height)?;
        let sharpened = UnsharpMask::AFTER_RESIZE.apply(&scaled);
        imaging::write(&sharpened, preview)?;
        Ok((width, height))
    }

    fn optimize(&self, path: &Path) -> Result<()> {
        match &self.optimizer {
            Some(optimizer) => optimizer.optimize(self.runner, path),
            None => Ok(()),
        }
    }

    /// Remove the old-format preview. Refuses unless the replacement exists.
    pub fn retire_legacy(&self, preview: &Path) -> Result<bool> {
        let legacy = preview.with_extension(&self.config.legacy_extension);
        if legacy == preview {
            return Ok(false);
        }

        fs::metadata(preview).map_err(|e| PipelineError::io(preview, e))?;

        match fs::remove_file(&legacy) {
            Ok(()) => {
                info!("removed legacy thumbnail {}", legacy.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PipelineError::io(legacy, e)),
        }
    }
}

fn stat(path: &Path) -> Result<MediaRecord> {
    let meta = fs::metadata(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(MediaRecord::new(path, meta.len()))
}
