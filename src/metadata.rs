//! Capture metadata for raw videos
//!
//! Tags are read through [`TagReader`]; the production reader shells out to
//! ExifTool and decodes its JSON output. Only the capture timestamp and the
//! GPS fix are kept. A missing tag leaves the field unset.
//!
//! ## Example
//!
//! ```rust,ignore
//! let reader = ExifTool::new("exiftool", &runner);
//! let meta = VideoMetadata::from_tags(&reader.read_tags(Path::new("clip.mov"))?);
//! println!("Taken: {:?}", meta.created);
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::process::{ProcessRunner, ToolCommand};
use crate::record::GpsFix;

/// Tags requested from ExifTool. `#` asks for the numeric form of a tag.
const REQUESTED_TAGS: &[&str] = &[
    "-CreateDate",
    "-GPSLatitude#",
    "-GPSLatitudeRef",
    "-GPSLongitude#",
    "-GPSLongitudeRef",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Number(f64),
    Date(DateTime<FixedOffset>),
}

impl TagValue {
    /// Interpret a JSON value from ExifTool.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(TagValue::Number),
            Value::String(s) => Some(
                parse_exif_date(s)
                    .map(TagValue::Date)
                    .unwrap_or_else(|| TagValue::Text(s.clone())),
            ),
            Value::Bool(b) => Some(TagValue::Text(b.to_string())),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Number(n) => Some(*n),
            TagValue::Text(s) => s.trim().parse().ok(),
            TagValue::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            TagValue::Date(d) => Some(*d),
            TagValue::Text(s) => parse_exif_date(s),
            TagValue::Number(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            TagValue::Text(s) => Some(s.clone()),
            TagValue::Number(n) => Some(n.to_string()),
            TagValue::Date(d) => Some(d.to_rfc3339()),
        }
    }
}

/// Tag name to value, for one file.
pub type TagSet = HashMap<String, TagValue>;

/// Tag-extraction capability.
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<TagSet>;
}

/// ExifTool backend, run through a [`ProcessRunner`] so it shares the timeout.
pub struct ExifTool<'a> {
    program: String,
    runner: &'a dyn ProcessRunner,
}

impl<'a> ExifTool<'a> {
    pub fn new(program: impl Into<String>, runner: &'a dyn ProcessRunner) -> Self {
        Self { program: program.into(), runner }
    }
}

impl TagReader for ExifTool<'_> {
    fn read_tags(&self, path: &Path) -> Result<TagSet> {
        let output = ToolCommand::new(self.program.as_str())
            .args(&["-j", "-q"])
            .args(REQUESTED_TAGS)
            .output(path)
            .execute(self.runner)?;

        parse_exiftool_json(path, &output.stdout)
    }
}

/// Decode `exiftool -j` output for a single file.
pub fn parse_exiftool_json(path: &Path, stdout: &[u8]) -> Result<TagSet> {
    let parsed: Vec<HashMap<String, Value>> = serde_json::from_slice(stdout)
        .map_err(|e| PipelineError::decode(path, format!("ExifTool JSON parse error: {}", e)))?;

    let tags = parsed.into_iter().next()
        .ok_or_else(|| PipelineError::decode(path, "ExifTool returned no entries"))?;

    Ok(tags.iter()
        .filter(|(k, _)| k.as_str() != "SourceFile")
        .filter_map(|(k, v)| TagValue::from_json(v).map(|t| (k.clone(), t)))
        .collect())
}

/// ExifTool dates look like `2019:06:01 12:30:45`, optionally with a zone.
/// Zoneless QuickTime dates are stored in UTC.
pub fn parse_exif_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S%:z") {
        return Some(dt);
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S").ok()?;
    Some(Utc.from_utc_datetime(&naive).into())
}

/// Fields gathered for one video.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
    pub created: Option<DateTime<FixedOffset>>,
    pub gps: GpsFix,
}

impl VideoMetadata {
    pub fn from_tags(tags: &TagSet) -> Self {
        let reference = |key: &str| -> Option<char> {
            tags.get(key)
                .and_then(TagValue::as_text)
                .and_then(|s| s.trim().chars().next())
                .map(|c| c.to_ascii_uppercase())
        };

        Self {
            created: tags.get("CreateDate").and_then(TagValue::as_date),
            gps: GpsFix {
                latitude: tags.get("GPSLatitude").and_then(TagValue::as_f64),
                latitude_ref: reference("GPSLatitudeRef"),
                longitude: tags.get("GPSLongitude").and_then(TagValue::as_f64),
                longitude_ref: reference("GPSLongitudeRef"),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_none() && self.gps == GpsFix::default()
    }
}

/// Read and interpret the tags of one file.
pub fn gather(reader: &dyn TagReader, path: &Path) -> Result<VideoMetadata> {
    let tags = reader.read_tags(path)?;
    Ok(VideoMetadata::from_tags(&tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessOutcome, ProcessOutput};
    use chrono::{Datelike, Timelike};

    struct CannedExifTool(&'static str);

    impl ProcessRunner for CannedExifTool {
        fn run(&self, _program: &str, args: &[String]) -> ProcessOutcome {
            assert!(args.iter().any(|a| a == "-j"));
            ProcessOutcome::Success(ProcessOutput { stdout: self.0.as_bytes().to_vec(), stderr: Vec::new() })
        }
    }

    #[test]
    fn test_date_parsing() {
        let dt = parse_exif_date("2019:06:01 12:30:45").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2019, 6, 1));
        assert_eq!(dt.offset().local_minus_utc(), 0);

        let dt = parse_exif_date("2019:06:01 12:30:45-07:00").unwrap();
        assert_eq!(dt.hour(), 12);
        assert_eq!(dt.offset().local_minus_utc(), -7 * 3600);

        assert!(parse_exif_date("0000:00:00 00:00:00").is_none());
        assert!(parse_exif_date("North").is_none());
    }

    #[test]
    fn test_full_tag_set() {
        let json = r#"[{
            "SourceFile": "/movies/raw/clip.mov",
            "CreateDate": "2018:07:04 18:02:11",
            "GPSLatitude": 47.6205,
            "GPSLatitudeRef": "North",
            "GPSLongitude": 122.3493,
            "GPSLongitudeRef": "West"
        }]"#;
        let runner = CannedExifTool(json);
        let reader = ExifTool::new("exiftool", &runner);

        let meta = gather(&reader, Path::new("/movies/raw/clip.mov")).unwrap();
        assert_eq!(meta.created.unwrap().year(), 2018);
        assert_eq!(meta.gps.latitude, Some(47.6205));
        assert_eq!(meta.gps.latitude_ref, Some('N'));
        assert_eq!(meta.gps.longitude, Some(122.3493));
        assert_eq!(meta.gps.longitude_ref, Some('W'));
    }

    #[test]
    fn test_missing_tags_leave_fields_unset() {
        let runner = CannedExifTool(r#"[{"SourceFile": "/movies/raw/clip.mov"}]"#);
        let reader = ExifTool::new("exiftool", &runner);

        let meta = gather(&reader, Path::new("/movies/raw/clip.mov")).unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let tags = parse_exiftool_json(
            Path::new("a.mov"),
            br#"[{"GPSLatitude": "12.5", "GPSLatitudeRef": "S"}]"#,
        ).unwrap();
        let meta = VideoMetadata::from_tags(&tags);
        assert_eq!(meta.gps.latitude, Some(12.5));
        assert_eq!(meta.gps.latitude_ref, Some('S'));
        assert_eq!(meta.gps.longitude, None);
    }

    #[test]
    fn test_garbage_output_is_a_decode_failure() {
        let err = parse_exiftool_json(Path::new("a.mov"), b"Error: file not found").unwrap_err();
        assert_eq!(err.kind(), "decode");
    }
}
