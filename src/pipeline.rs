//! Run orchestration
//!
//! One run is a fixed sequence of phases, each a full barrier:
//!
//! 1. scan + assemble photos
//! 2. scan + assemble videos
//! 3. photo square thumbnails (`lg` -> `xs_sq`)
//! 4. video previews and square thumbnails (`raw` -> `thumbnails`, `thumb_sq`)
//! 5. video capture metadata
//! 6. update script
//!
//! The [`Pipeline`] owns the worker pool and the process runner (and with it
//! the runtime used for external tools) for the duration of the run; both are
//! released when it drops, whatever path the run took.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::assemble::{assemble, sibling_path, Assembly};
use crate::config::{PipelineConfig, RegenerateMode};
use crate::error::{PipelineError, Result};
use crate::image::SquareThumbnailer;
use crate::metadata::{self, ExifTool, TagReader, VideoMetadata};
use crate::metrics::{BucketSummary, PhaseSummary, RunSummary, Timer};
use crate::pool::{CancelToken, Phase, PhaseOutcome, UnitFailure, WorkerPool};
use crate::process::{ProcessRunner, SystemRunner};
use crate::record::{AssetRecord, MediaRecord, PhotoAsset, PhotoVariant, Variant, VideoAsset, VideoVariant};
use crate::scanner;
use crate::script::UpdateScript;
use crate::video::{VideoConfig, VideoThumbnailer, VideoThumbnails};

/// Everything a run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub photos: Vec<PhotoAsset>,
    pub videos: Vec<VideoAsset>,
    pub summary: RunSummary,
    /// Whether the update script was written.
    pub script_written: bool,
}

pub struct Pipeline {
    config: PipelineConfig,
    pool: WorkerPool,
    runner: Box<dyn ProcessRunner>,
    tag_reader: Option<Box<dyn TagReader>>,
}

impl Pipeline {
    /// Validate the configuration and acquire the run's resources.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let runner = SystemRunner::new(config.process_timeout)?;
        Self::with_runner(config, Box::new(runner), CancelToken::new())
    }

    pub fn with_runner(config: PipelineConfig, runner: Box<dyn ProcessRunner>, cancel: CancelToken) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.workers, cancel)?;
        Ok(Self { config, pool, runner, tag_reader: None })
    }

    /// Replace the ExifTool reader, e.g. with a canned one.
    pub fn with_tag_reader(mut self, reader: Box<dyn TagReader>) -> Self {
        self.tag_reader = Some(reader);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.pool.cancel_token().clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> RunOutput {
        let timer = Timer::new();
        let mut summary = RunSummary::default();

        let photo_root = self.config.photo_root.clone();
        let video_root = self.config.video_root.clone();

        let mut photos = self.scan_and_assemble::<PhotoVariant>(
            "photos",
            Phase::new("scan.photos").progress_every(2000),
            &photo_root,
            &mut summary,
        );
        let mut videos = self.scan_and_assemble::<VideoVariant>(
            "videos",
            Phase::new("scan.videos").progress_every(100),
            &video_root,
            &mut summary,
        );

        if self.config.regenerate != RegenerateMode::Off {
            let outcome = self.regenerate_photo_thumbnails(&photos);
            summary.push_phase(outcome.summary());
            for (idx, square) in outcome.results {
                photos[idx].set(PhotoVariant::XsSq, Some(square));
            }

            let outcome = self.regenerate_video_thumbnails(&videos);
            summary.push_phase(outcome.summary());
            for (idx, thumbs) in outcome.results {
                videos[idx].set(VideoVariant::Thumb, Some(thumbs.preview));
                videos[idx].set(VideoVariant::ThumbSq, Some(thumbs.square));
            }
        }

        let outcome = self.gather_video_metadata(&videos);
        summary.push_phase(outcome.summary());
        for (idx, meta) in outcome.results {
            videos[idx].created = meta.created;
            videos[idx].gps = meta.gps;
        }

        summary.cancelled = self.pool.cancel_token().is_cancelled();

        let script_written = if summary.cancelled {
            warn!("Run cancelled, not writing {}", self.config.output.display());
            false
        } else {
            let phase = self.write_script(&photos, &videos);
            let ok = phase.failed == 0;
            summary.push_phase(phase);
            ok
        };

        summary.total_ms = timer.elapsed_ms();

        RunOutput { photos, videos, summary, script_written }
    }

    fn scan_and_assemble<V: Variant>(
        &self,
        class: &'static str,
        phase: Phase,
        root: &Path,
        summary: &mut RunSummary,
    ) -> Vec<AssetRecord<V>> {
        info!("Getting {} under {}", class, root.display());
        let outcome = scanner::scan(&self.pool, phase, root);
        summary.push_phase(outcome.summary());

        info!("Assembling {} from {} files", class, outcome.results.len());
        let Assembly { assets, report } = assemble::<V>(root, outcome.results);
        info!("Finished assembling {} {}", assets.len(), class);

        summary.buckets.push(BucketSummary::from_report(class, &report));
        assets
    }

    fn regenerate_photo_thumbnails(&self, photos: &[PhotoAsset]) -> PhaseOutcome<(usize, MediaRecord)> {
        let units: Vec<(usize, PathBuf)> = photos.iter()
            .enumerate()
            .filter(|(_, p)| self.config.regenerate == RegenerateMode::All || p.get(PhotoVariant::XsSq).is_none())
            .filter_map(|(i, p)| p.get(PhotoVariant::Lg).map(|lg| (i, lg.path.clone())))
            .collect();

        let thumber = SquareThumbnailer::default();
        let runner = self.runner.as_ref();
        let optimizer = self.config.optimizer.as_ref();

        self.pool.run(
            Phase::new("thumbnails.photos").progress_every(500),
            &units,
            |(_, lg)| lg.display().to_string(),
            |(idx, lg)| {
                let dest = sibling_path(lg, PhotoVariant::Lg.dir_name(), PhotoVariant::XsSq.dir_name(), None)
                    .ok_or_else(|| PipelineError::Configuration(format!("{} is not inside an 'lg' directory", lg.display())))?;

                let (width, height) = thumber.generate(lg, &dest)?;
                if let Some(optimizer) = optimizer {
                    optimizer.optimize(runner, &dest)?;
                }

                let meta = std::fs::metadata(&dest).map_err(|e| PipelineError::io(&dest, e))?;
                Ok((*idx, MediaRecord::new(dest, meta.len()).with_dimensions(width, height)))
            },
        )
    }

    fn regenerate_video_thumbnails(&self, videos: &[VideoAsset]) -> PhaseOutcome<(usize, VideoThumbnails)> {
        let video_config = VideoConfig {
            ffmpeg: self.config.ffmpeg.clone(),
            ..Default::default()
        };
        let legacy = video_config.legacy_extension.clone();

        let units: Vec<(usize, PathBuf)> = videos.iter()
            .enumerate()
            .filter(|(_, v)| {
                self.config.regenerate == RegenerateMode::All
                    || v.get(VideoVariant::ThumbSq).is_none()
                    || v.get(VideoVariant::Thumb).map_or(false, |t| has_extension(&t.path, &legacy))
            })
            .filter_map(|(i, v)| v.get(VideoVariant::Raw).map(|raw| (i, raw.path.clone())))
            .collect();

        let thumber = VideoThumbnailer::new(video_config, self.runner.as_ref())
            .with_optimizer(self.config.optimizer.clone());

        self.pool.run(
            Phase::new("thumbnails.videos").progress_every(100),
            &units,
            |(_, raw)| raw.display().to_string(),
            |(idx, raw)| thumber.regenerate(raw).map(|t| (*idx, t)),
        )
    }

    fn gather_video_metadata(&self, videos: &[VideoAsset]) -> PhaseOutcome<(usize, VideoMetadata)> {
        let units: Vec<(usize, PathBuf)> = videos.iter()
            .enumerate()
            .filter_map(|(i, v)| v.get(VideoVariant::Raw).map(|raw| (i, raw.path.clone())))
            .collect();

        let exiftool;
        let reader: &dyn TagReader = match &self.tag_reader {
            Some(reader) => reader.as_ref(),
            None => {
                exiftool = ExifTool::new(self.config.exiftool.as_str(), self.runner.as_ref());
                &exiftool
            }
        };

        info!("Trying to gather additional metadata for {} video files", units.len());
        self.pool.run(
            Phase::new("metadata.videos").progress_every(100),
            &units,
            |(_, raw)| raw.display().to_string(),
            |(idx, raw)| metadata::gather(reader, raw).map(|m| (*idx, m)),
        )
    }

    fn write_script(&self, photos: &[PhotoAsset], videos: &[VideoAsset]) -> PhaseSummary {
        let timer = Timer::new();
        let script = UpdateScript::new(&self.config.photo_web_marker, &self.config.video_web_marker);
        let (results, failures) = match script.write(&self.config.output, photos, videos) {
            Ok(()) => (vec![()], Vec::new()),
            Err(error) => {
                let unit = self.config.output.display().to_string();
                (Vec::new(), vec![UnitFailure { unit, error }])
            }
        };

        let outcome = PhaseOutcome {
            phase: "script",
            results,
            failures,
            skipped: 0,
            elapsed_ms: timer.elapsed_ms(),
        };
        outcome.summary()
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(ext))
}
