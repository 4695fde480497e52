//! Image operations and the square thumbnail generator

use std::fs;
use std::path::Path;

use fast_image_resize as fr;
use fr::images::Image as FrImage;
use image::{ImageError, ImageFormat, RgbImage};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::process::{ProcessRunner, ToolCommand};

/// Unsharp mask parameters, ImageMagick style.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnsharpMask {
    /// Kept for parity with the ImageMagick call; 0 derives the kernel from sigma.
    pub radius: f32,
    pub sigma: f32,
    pub amount: f32,
    /// Fraction of the full channel range below which differences are left alone.
    pub threshold: f32,
}

impl UnsharpMask {
    /// Applied after every resize.
    pub const AFTER_RESIZE: UnsharpMask = UnsharpMask {
        radius: 0.0,
        sigma: 0.7,
        amount: 0.7,
        threshold: 0.008,
    };

    pub fn apply(&self, img: &RgbImage) -> RgbImage {
        let blurred = image::imageops::blur(img, self.sigma);
        let threshold = self.threshold * 255.0;

        let mut out = img.clone();
        for (dst, (src, blur)) in out.pixels_mut().zip(img.pixels().zip(blurred.pixels())) {
            for c in 0..3 {
                let orig = src[c] as f32;
                let diff = orig - blur[c] as f32;
                if diff.abs() > threshold {
                    dst[c] = (orig + self.amount * diff).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        out
    }
}

/// Decode an image into 8-bit RGB.
pub fn load(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).map_err(|e| PipelineError::decode(path, e))?;
    Ok(img.to_rgb8())
}

/// Resize to exactly `width` x `height` (SIMD Lanczos3).
pub fn scale(img: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    let width = width.max(1);
    let height = height.max(1);
    if img.dimensions() == (width, height) {
        return Ok(img.clone());
    }

    let src_image = FrImage::from_vec_u8(
        img.width(),
        img.height(),
        img.as_raw().clone(),
        fr::PixelType::U8x3,
    ).map_err(|e| PipelineError::decode("<memory>", format!("Failed to create source image: {:?}", e)))?;

    let mut dst_image = FrImage::new(width, height, src_image.pixel_type());

    let mut resizer = fr::Resizer::new();
    resizer.resize(&src_image, &mut dst_image, None)
        .map_err(|e| PipelineError::decode("<memory>", format!("Resize failed: {:?}", e)))?;

    RgbImage::from_raw(width, height, dst_image.buffer().to_vec())
        .ok_or_else(|| PipelineError::decode("<memory>", "Failed to create image from resized data"))
}

/// Cut a `width` x `height` window at (`x`, `y`).
pub fn crop(img: &RgbImage, width: u32, height: u32, x: u32, y: u32) -> RgbImage {
    image::imageops::crop_imm(img, x, y, width, height).to_image()
}

/// Write `img`, creating parent directories and replacing any existing file.
/// The format follows the destination extension, JPEG when unknown.
pub fn write(img: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Jpeg);
    img.save_with_format(path, format).map_err(|e| match e {
        ImageError::IoError(source) => PipelineError::io(path, source),
        other => PipelineError::Encode { path: path.to_path_buf(), reason: other.to_string() },
    })
}

/// Largest size with the source aspect that fits inside `max_w` x `max_h`.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let ideal = max_w as f64 / max_h as f64;
    let actual = width as f64 / height.max(1) as f64;

    if ideal >= actual {
        (((actual * max_h as f64).round() as u32).max(1), max_h)
    } else {
        (max_w, ((max_w as f64 / actual).round() as u32).max(1))
    }
}

/// Scale factor and crop window that turn a source into the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropPlan {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub crop_x: u32,
    pub crop_y: u32,
}

impl CropPlan {
    /// Fill the target box: match the constrained edge, center-crop the other.
    pub fn fill(width: u32, height: u32, target_w: u32, target_h: u32) -> Self {
        let source_aspect = width as f64 / height.max(1) as f64;
        let target_aspect = target_w as f64 / target_h as f64;

        if source_aspect >= target_aspect {
            let scaled_width = ((width as f64 * target_h as f64 / height.max(1) as f64).round() as u32).max(target_w);
            CropPlan {
                scaled_width,
                scaled_height: target_h,
                crop_x: (scaled_width - target_w) / 2,
                crop_y: 0,
            }
        } else {
            let scaled_height = ((height as f64 * target_w as f64 / width.max(1) as f64).round() as u32).max(target_h);
            CropPlan {
                scaled_width: target_w,
                scaled_height,
                crop_x: 0,
                crop_y: (scaled_height - target_h) / 2,
            }
        }
    }

    pub fn crops(&self, target_w: u32, target_h: u32) -> bool {
        self.scaled_width != target_w || self.scaled_height != target_h
    }
}

/// Optional lossless re-encode and metadata strip after writing a thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub program: String,
    pub max_quality: u8,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            program: "jpegoptim".to_string(),
            max_quality: 90,
        }
    }
}

impl OptimizerConfig {
    pub fn optimize(&self, runner: &dyn ProcessRunner, path: &Path) -> Result<()> {
        ToolCommand::new(self.program.as_str())
            .args(&[
                "--strip-all",
                "--all-progressive",
                &format!("--max={}", self.max_quality),
                "--overwrite",
                "--quiet",
            ])
            .output(path)
            .execute(runner)?;
        Ok(())
    }
}

/// Fixed 4:3 box thumbnail: scale, center-crop, sharpen.
pub struct SquareThumbnailer {
    pub width: u32,
    pub height: u32,
    pub sharpen: UnsharpMask,
}

impl Default for SquareThumbnailer {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            sharpen: UnsharpMask::AFTER_RESIZE,
        }
    }
}

impl SquareThumbnailer {
    /// Produce the thumbnail from an in-memory image.
    pub fn render(&self, img: &RgbImage) -> Result<RgbImage> {
        let plan = CropPlan::fill(img.width(), img.height(), self.width, self.height);
        let scaled = scale(img, plan.scaled_width, plan.scaled_height)?;

        let fitted = if plan.crops(self.width, self.height) {
            crop(&scaled, self.width, self.height, plan.crop_x, plan.crop_y)
        } else {
            scaled
        };

        Ok(self.sharpen.apply(&fitted))
    }

    /// Read `source`, write the thumbnail to `dest`. `source` and `dest` may be
    /// the same file.
    pub fn generate(&self, source: &Path, dest: &Path) -> Result<(u32, u32)> {
        debug!("square thumbnail {} -> {}", source.display(), dest.display());
        let img = load(source)?;
        let thumb = self.render(&img)?;
        write(&thumb, dest)?;
        Ok(thumb.dimensions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn test_wide_source_crops_horizontally() {
        let plan = CropPlan::fill(1920, 1080, 160, 120);
        assert_eq!(plan.scaled_height, 120);
        assert_eq!(plan.scaled_width, 213);
        assert_eq!(plan.crop_x, 26);
        assert_eq!(plan.crop_y, 0);
        assert!(plan.crops(160, 120));
    }

    #[test]
    fn test_tall_source_crops_vertically() {
        let plan = CropPlan::fill(1080, 1920, 160, 120);
        assert_eq!(plan.scaled_width, 160);
        assert_eq!(plan.scaled_height, 284);
        assert_eq!(plan.crop_x, 0);
        assert_eq!(plan.crop_y, 82);
    }

    #[test]
    fn test_matching_aspect_is_scale_only() {
        let plan = CropPlan::fill(640, 480, 160, 120);
        assert_eq!(plan, CropPlan { scaled_width: 160, scaled_height: 120, crop_x: 0, crop_y: 0 });
        assert!(!plan.crops(160, 120));
    }

    #[test]
    fn test_fit_within_preview_box() {
        assert_eq!(fit_within(1920, 1080, 240, 160), (240, 135));
        assert_eq!(fit_within(1080, 1920, 240, 160), (90, 160));
        assert_eq!(fit_within(480, 320, 240, 160), (240, 160));
    }

    #[test]
    fn test_render_output_is_target_box() {
        let thumber = SquareThumbnailer::default();
        for (w, h) in [(1920, 1080), (1080, 1920), (640, 480), (100, 50)] {
            let out = thumber.render(&solid(w, h, [10, 200, 30])).unwrap();
            assert_eq!(out.dimensions(), (160, 120), "source {}x{}", w, h);
        }
    }

    #[test]
    fn test_sharpen_leaves_flat_regions_alone() {
        let img = solid(20, 20, [128, 128, 128]);
        let out = UnsharpMask::AFTER_RESIZE.apply(&img);
        assert_eq!(out, img);
    }

    #[test]
    fn test_sharpen_boosts_edges() {
        let mut img = solid(20, 20, [50, 50, 50]);
        for y in 0..20 {
            for x in 10..20 {
                img.put_pixel(x, y, Rgb([200, 200, 200]));
            }
        }
        let out = UnsharpMask::AFTER_RESIZE.apply(&img);
        assert!(out.get_pixel(10, 10)[0] > 200 - 1);
        assert!(out.get_pixel(9, 10)[0] < 50);
    }

    #[test]
    fn test_generate_overwrites_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/thumb_sq/a.jpg");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        solid(1920, 1080, [0, 0, 255]).save(&path).unwrap();

        let dims = SquareThumbnailer::default().generate(&path, &path).unwrap();
        assert_eq!(dims, (160, 120));
        assert_eq!(image::image_dimensions(&path).unwrap(), (160, 120));
    }

    struct RecordingOptimizer {
        fail: bool,
        args: std::sync::Mutex<Vec<String>>,
    }

    impl ProcessRunner for RecordingOptimizer {
        fn run(&self, _program: &str, args: &[String]) -> crate::process::ProcessOutcome {
            *self.args.lock().unwrap() = args.to_vec();
            if self.fail {
                crate::process::ProcessOutcome::TimedOut(std::time::Duration::from_secs(1))
            } else {
                crate::process::ProcessOutcome::Success(Default::default())
            }
        }
    }

    #[test]
    fn test_optimizer_arguments_and_failure() {
        let runner = RecordingOptimizer { fail: false, args: Default::default() };
        let optimizer = OptimizerConfig { max_quality: 85, ..Default::default() };
        optimizer.optimize(&runner, Path::new("/p/xs_sq/a.jpg")).unwrap();
        assert_eq!(
            *runner.args.lock().unwrap(),
            ["--strip-all", "--all-progressive", "--max=85", "--overwrite", "--quiet", "/p/xs_sq/a.jpg"]
        );

        let runner = RecordingOptimizer { fail: true, args: Default::default() };
        let err = optimizer.optimize(&runner, Path::new("/p/xs_sq/a.jpg")).unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_write_failure_is_io_not_decode() {
        let dir = TempDir::new().unwrap();
        let occupied = dir.path().join("xs_sq/a.jpg");
        fs::create_dir_all(&occupied).unwrap();

        let err = write(&solid(16, 12, [9, 9, 9]), &occupied).unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_generate_creates_destination_directory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("lg/a.png");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        solid(300, 600, [1, 2, 3]).save(&src).unwrap();

        let dest = dir.path().join("xs_sq/a.png");
        SquareThumbnailer::default().generate(&src, &dest).unwrap();
        assert_eq!(image::image_dimensions(&dest).unwrap(), (160, 120));
    }
}
