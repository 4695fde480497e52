//! Filesystem scan: one [`MediaRecord`] per regular file under a root

use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, Result};
use crate::pool::{Phase, PhaseOutcome, UnitFailure, WorkerPool};
use crate::record::MediaRecord;

/// Camera RAW extensions. Dimensions for these come from the store, not from decoding.
const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "nrw", "arw", "srf", "sr2", "dng", "raf", "orf", "rw2", "pef", "srw", "x3f",
];

/// Enumerate every regular file under `root`, recursively. Order is unspecified.
///
/// Entries that cannot be read are returned as failures rather than dropped.
pub fn enumerate_files(root: &Path) -> (Vec<PathBuf>, Vec<UnitFailure>) {
    let mut files = Vec::new();
    let mut failures = Vec::new();

    for entry in WalkDir::new(root) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                let source = e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
                failures.push(UnitFailure {
                    unit: path.display().to_string(),
                    error: PipelineError::io(path, source),
                });
            }
        }
    }

    (files, failures)
}

/// Whether dimensions can be read by decoding the file locally.
pub fn is_decodable_image(path: &Path) -> bool {
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if RAW_EXTENSIONS.contains(&extension.as_str()) {
        return false;
    }

    ImageFormat::from_path(path)
        .map(|format| format.reading_enabled())
        .unwrap_or(false)
}

/// Build the record for one file: size always, dimensions for decodable images.
///
/// Only a failed stat loses the record. A failed dimension read keeps the
/// record with its dimensions unset and hands the decode error back beside it.
pub fn populate(path: &Path) -> Result<(MediaRecord, Option<PipelineError>)> {
    let meta = fs::metadata(path).map_err(|e| PipelineError::io(path, e))?;
    let record = MediaRecord::new(path, meta.len());

    if !is_decodable_image(path) {
        return Ok((record, None));
    }

    match image::image_dimensions(path) {
        Ok((width, height)) => Ok((record.with_dimensions(width, height), None)),
        Err(e) => Ok((record, Some(PipelineError::decode(path, e)))),
    }
}

/// Scan a whole tree on the pool. Enumeration failures and dimension decode
/// failures are folded into the phase outcome next to stat failures; records
/// whose dimensions could not be read are still returned.
pub fn scan(pool: &WorkerPool, phase: Phase, root: &Path) -> PhaseOutcome<MediaRecord> {
    let (files, walk_failures) = enumerate_files(root);
    debug!("{}: enumerated {} files under {}", phase.name, files.len(), root.display());

    let populated = pool.run(phase, &files, |p| p.display().to_string(), |p| populate(p));

    let mut failures = populated.failures;
    let mut results = Vec::with_capacity(populated.results.len());
    for (record, decode_error) in populated.results {
        if let Some(error) = decode_error {
            warn!("{}: no dimensions for {}: {}", phase.name, record.path.display(), error);
            failures.push(UnitFailure { unit: record.path.display().to_string(), error });
        }
        results.push(record);
    }
    failures.extend(walk_failures);

    PhaseOutcome {
        phase: populated.phase,
        results,
        failures,
        skipped: populated.skipped,
        elapsed_ms: populated.elapsed_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::CancelToken;
    use tempfile::TempDir;

    #[test]
    fn test_decodable_detection() {
        assert!(is_decodable_image(Path::new("/p/lg/a.jpg")));
        assert!(is_decodable_image(Path::new("/p/lg/a.JPEG")));
        assert!(is_decodable_image(Path::new("/v/thumbnails/a.png")));
        assert!(!is_decodable_image(Path::new("/p/src/a.NEF")));
        assert!(!is_decodable_image(Path::new("/p/src/a.dng")));
        assert!(!is_decodable_image(Path::new("/v/raw/a.mp4")));
        assert!(!is_decodable_image(Path::new("/v/raw/noext")));
    }

    #[test]
    fn test_populate_reads_size_and_dimensions() {
        let dir = TempDir::new().unwrap();
        let img_path = dir.path().join("a.png");
        image::RgbImage::new(32, 24).save(&img_path).unwrap();
        let raw_path = dir.path().join("a.nef");
        fs::write(&raw_path, vec![0u8; 1234]).unwrap();

        let (img, err) = populate(&img_path).unwrap();
        assert!(err.is_none());
        assert_eq!(img.width, Some(32));
        assert_eq!(img.height, Some(24));
        assert!(img.size > 0);

        let (raw, err) = populate(&raw_path).unwrap();
        assert!(err.is_none());
        assert_eq!(raw.size, 1234);
        assert_eq!(raw.width, None);
    }

    #[test]
    fn test_corrupt_image_keeps_record_without_dimensions() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.jpg");
        fs::write(&bad, b"not a jpeg").unwrap();

        let (record, err) = populate(&bad).unwrap();
        assert_eq!(record.size, 10);
        assert_eq!((record.width, record.height), (None, None));
        assert_eq!(err.unwrap().kind(), "decode");
    }

    #[test]
    fn test_unreadable_file_is_an_io_failure() {
        let dir = TempDir::new().unwrap();
        let err = populate(&dir.path().join("gone.jpg")).unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_scan_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("xs");
        fs::create_dir_all(&sub).unwrap();
        image::RgbImage::new(8, 6).save(sub.join("good.png")).unwrap();
        fs::write(sub.join("bad.jpg"), b"garbage").unwrap();
        fs::write(sub.join("clip.mp4"), vec![0u8; 10]).unwrap();

        let pool = WorkerPool::new(4, CancelToken::new()).unwrap();
        let outcome = scan(&pool, Phase::new("scan.test"), dir.path());

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].unit.ends_with("bad.jpg"));
        assert_eq!(outcome.failures[0].error.kind(), "decode");

        let bad = outcome.results.iter().find(|r| r.path.ends_with("bad.jpg")).unwrap();
        assert_eq!(bad.size, 7);
        assert!(bad.width.is_none());
    }
}
