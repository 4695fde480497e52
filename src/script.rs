//! Update script emission
//!
//! Renders the reconciled assets as idempotent PostgreSQL statements for the
//! external store. Nothing here touches a database.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::record::{MediaRecord, PhotoAsset, PhotoVariant, VideoAsset, VideoVariant};

const SEP: &str = "-- -------------------------------------------";

pub struct UpdateScript<'a> {
    pub photo_web_marker: &'a str,
    pub video_web_marker: &'a str,
}

impl<'a> UpdateScript<'a> {
    pub fn new(photo_web_marker: &'a str, video_web_marker: &'a str) -> Self {
        Self { photo_web_marker, video_web_marker }
    }

    pub fn render(&self, photos: &[PhotoAsset], videos: &[VideoAsset]) -> String {
        let mut out = String::new();

        section(&mut out, "create indexes to improve update performance");
        out.push_str(&create_index_guard("photo", "photo", "ix_photo_photo_xs_path", "xs_path"));
        out.push_str(&create_index_guard("video", "video", "ix_video_video_thumb_path", "thumb_path"));

        section(&mut out, "add photo sizes and new thumbnail details");
        for photo in photos {
            if let Some(stmt) = self.photo_update(photo) {
                out.push_str(&stmt);
                out.push('\n');
            }
        }

        section(&mut out, "add video sizes, gps, create_date, and new thumbnail details");
        for video in videos {
            if let Some(stmt) = self.video_update(video) {
                out.push_str(&stmt);
                out.push('\n');
            }
        }

        section(&mut out, "bulk update photo category details");
        out.push_str(&category_rollup(&CategoryRollup::PHOTO));
        out.push('\n');

        section(&mut out, "bulk update video category details");
        out.push_str(&category_rollup(&CategoryRollup::VIDEO));
        out.push('\n');

        section(&mut out, "drop the indexes that were used for these updates");
        out.push_str("DROP INDEX IF EXISTS photo.ix_photo_photo_xs_path;\n");
        out.push_str("DROP INDEX IF EXISTS video.ix_video_video_thumb_path;\n");

        out
    }

    /// Render and write, replacing any previous script.
    pub fn write(&self, path: &Path, photos: &[PhotoAsset], videos: &[VideoAsset]) -> Result<()> {
        let script = self.render(photos, videos);
        fs::write(path, script).map_err(|e| PipelineError::io(path, e))?;
        info!("wrote update script for {} photos and {} videos to {}", photos.len(), videos.len(), path.display());
        Ok(())
    }

    pub fn photo_update(&self, photo: &PhotoAsset) -> Option<String> {
        let xs = photo.get(PhotoVariant::Xs)?;
        let xs_sq = photo.get(PhotoVariant::XsSq);
        let size = |v| sql_number(photo.get(v).map(|m| m.size));

        Some(format!(
            "UPDATE photo.photo \
             SET xs_size = {}, \
             sm_size = {}, \
             md_size = {}, \
             lg_size = {}, \
             prt_size = {}, \
             src_size = {}, \
             xs_sq_height = {}, \
             xs_sq_width = {}, \
             xs_sq_path = {}, \
             xs_sq_size = {} \
             WHERE xs_path = {};",
            sql_number(Some(xs.size)),
            size(PhotoVariant::Sm),
            size(PhotoVariant::Md),
            size(PhotoVariant::Lg),
            size(PhotoVariant::Prt),
            size(PhotoVariant::Src),
            sql_number(xs_sq.and_then(|m| m.height)),
            sql_number(xs_sq.and_then(|m| m.width)),
            sql_string(xs_sq.map(|m| web_path(m, self.photo_web_marker)).as_deref()),
            sql_number(xs_sq.map(|m| m.size)),
            sql_string(Some(web_path(xs, self.photo_web_marker).as_str())),
        ))
    }

    pub fn video_update(&self, video: &VideoAsset) -> Option<String> {
        let thumb = video.get(VideoVariant::Thumb)?;
        let thumb_sq = video.get(VideoVariant::ThumbSq);
        let size = |v| sql_number(video.get(v).map(|m| m.size));
        let gps = &video.gps;

        Some(format!(
            "UPDATE video.video \
             SET thumb_size = {}, \
             scaled_size = {}, \
             full_size = {}, \
             raw_size = {}, \
             thumb_sq_height = {}, \
             thumb_sq_width = {}, \
             thumb_sq_path = {}, \
             thumb_sq_size = {}, \
             gps_latitude = {}, \
             gps_latitude_ref_id = {}, \
             gps_longitude = {}, \
             gps_longitude_ref_id = {}, \
             create_date = {} \
             WHERE thumb_path = {};",
            sql_number(Some(thumb.size)),
            size(VideoVariant::Scaled),
            size(VideoVariant::Full),
            size(VideoVariant::Raw),
            sql_number(thumb_sq.and_then(|m| m.height)),
            sql_number(thumb_sq.and_then(|m| m.width)),
            sql_string(thumb_sq.map(|m| web_path(m, self.video_web_marker)).as_deref()),
            sql_number(thumb_sq.map(|m| m.size)),
            sql_number(gps.latitude),
            sql_string(gps.latitude_ref.map(String::from).as_deref()),
            sql_number(gps.longitude),
            sql_string(gps.longitude_ref.map(String::from).as_deref()),
            sql_timestamp(video.created.as_ref()),
            sql_string(Some(web_path(thumb, self.video_web_marker).as_str())),
        ))
    }
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "{}\n-- {}\n{}", SEP, title, SEP);
}

fn create_index_guard(schema: &str, table: &str, index: &str, column: &str) -> String {
    format!(
        "DO\n$$\nBEGIN\n    IF NOT EXISTS (SELECT 1\n                    FROM pg_catalog.pg_indexes\n                    WHERE schemaname = '{schema}'\n                    AND tablename = '{table}'\n                    AND indexname = '{index}') THEN\n\n        CREATE INDEX {index}\n            ON {schema}.{table}({column});\n\n    END IF;\nEND\n$$;\n",
    )
}

/// Column names for one media class's category rollup.
struct CategoryRollup {
    schema: &'static str,
    table: &'static str,
    count_column: &'static str,
    canonical: &'static str,
    square: &'static str,
    size_slots: &'static [&'static str],
    teaser: &'static str,
    with_duration: bool,
}

impl CategoryRollup {
    const PHOTO: CategoryRollup = CategoryRollup {
        schema: "photo",
        table: "photo",
        count_column: "photo_count",
        canonical: "xs",
        square: "xs_sq",
        size_slots: &["xs", "xs_sq", "sm", "md", "lg", "prt", "src"],
        teaser: "teaser_photo",
        with_duration: false,
    };

    const VIDEO: CategoryRollup = CategoryRollup {
        schema: "video",
        table: "video",
        count_column: "video_count",
        canonical: "thumb",
        square: "thumb_sq",
        size_slots: &["thumb", "thumb_sq", "scaled", "full", "raw"],
        teaser: "teaser_image",
        with_duration: true,
    };
}

fn category_rollup(r: &CategoryRollup) -> String {
    let t = format!("{}.{}", r.schema, r.table);
    let first = |column: &str, filter: &str| {
        format!(
            "(SELECT {column} FROM {t} WHERE id = (SELECT MIN(id) FROM {t} WHERE category_id = c.id AND {filter} IS NOT NULL))"
        )
    };
    let teaser = |column: &str| {
        format!(
            "(SELECT {column} FROM {t} WHERE category_id = c.id AND {canonical}_path = c.{teaser}_path)",
            canonical = r.canonical,
            teaser = r.teaser,
        )
    };

    let mut sets = vec![
        format!("{} = (SELECT COUNT(1) FROM {t} WHERE category_id = c.id)", r.count_column),
        format!("create_date = {}", first("create_date", "create_date")),
        format!("gps_latitude = {}", first("gps_latitude", "gps_latitude")),
        format!("gps_latitude_ref_id = {}", first("gps_latitude_ref_id", "gps_latitude")),
        format!("gps_longitude = {}", first("gps_longitude", "gps_latitude")),
        format!("gps_longitude_ref_id = {}", first("gps_longitude_ref_id", "gps_latitude")),
    ];

    if r.with_duration {
        sets.push(format!("total_duration = (SELECT SUM(duration) FROM {t} WHERE category_id = c.id)"));
    }

    for slot in r.size_slots {
        sets.push(format!("total_size_{slot} = (SELECT SUM({slot}_size) FROM {t} WHERE category_id = c.id)"));
    }

    sets.push(format!("{}_size = {}", r.teaser, teaser(&format!("{}_size", r.canonical))));
    for suffix in ["height", "width", "path", "size"] {
        sets.push(format!("{}_sq_{suffix} = {}", r.teaser, teaser(&format!("{}_{suffix}", r.square))));
    }

    format!("UPDATE {}.category c SET {};", r.schema, sets.join(", "))
}

/// Store-relative path: the suffix starting at `marker`, or the whole path.
pub fn web_path(media: &MediaRecord, marker: &str) -> String {
    let full = media.path.to_string_lossy().replace('\\', "/");
    match full.find(marker) {
        Some(idx) => full[idx..].to_string(),
        None => {
            warn!("{} does not contain '{}', using the full path", full, marker);
            full
        }
    }
}

pub fn sql_number<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string())
}

pub fn sql_string(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => format!("'{}'", v.replace('\'', "''")),
        _ => "NULL".to_string(),
    }
}

pub fn sql_timestamp(value: Option<&DateTime<FixedOffset>>) -> String {
    sql_string(value.map(|dt| dt.format("%Y-%m-%d %H:%M:%S%:z").to_string()).as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::parse_exif_date;

    #[test]
    fn test_literals() {
        assert_eq!(sql_number::<u64>(None), "NULL");
        assert_eq!(sql_number(Some(500u64)), "500");
        assert_eq!(sql_string(Some("O'Brien")), "'O''Brien'");
        assert_eq!(sql_string(Some("  ")), "NULL");
        assert_eq!(sql_string(None), "NULL");

        let dt = parse_exif_date("2019:06:01 12:30:45-07:00").unwrap();
        assert_eq!(sql_timestamp(Some(&dt)), "'2019-06-01 12:30:45-07:00'");
    }

    #[test]
    fn test_web_path() {
        let m = MediaRecord::new("/srv/www/images/2019/xs/a.jpg", 1);
        assert_eq!(web_path(&m, "/images/"), "/images/2019/xs/a.jpg");
        assert_eq!(web_path(&m, "/movies/"), "/srv/www/images/2019/xs/a.jpg");
    }

    #[test]
    fn test_photo_statement() {
        let mut photo = PhotoAsset::new(MediaRecord::new("/srv/images/2019/xs/a.jpg", 500));
        photo.set(PhotoVariant::Lg, Some(MediaRecord::new("/srv/images/2019/lg/a.jpg", 5000)));
        photo.set(
            PhotoVariant::XsSq,
            Some(MediaRecord::new("/srv/images/2019/xs_sq/a.jpg", 90).with_dimensions(160, 120)),
        );

        let script = UpdateScript::new("/images/", "/movies/");
        let stmt = script.photo_update(&photo).unwrap();
        assert!(stmt.contains("xs_size = 500"));
        assert!(stmt.contains("lg_size = 5000"));
        assert!(stmt.contains("sm_size = NULL"));
        assert!(stmt.contains("xs_sq_width = 160"));
        assert!(stmt.contains("xs_sq_path = '/images/2019/xs_sq/a.jpg'"));
        assert!(stmt.ends_with("WHERE xs_path = '/images/2019/xs/a.jpg';"));
    }

    #[test]
    fn test_video_statement_includes_gps() {
        let mut video = VideoAsset::new(MediaRecord::new("/srv/movies/2019/thumbnails/a.jpg", 10));
        video.gps.latitude = Some(47.5);
        video.gps.latitude_ref = Some('N');
        video.created = parse_exif_date("2019:06:01 12:30:45");

        let stmt = UpdateScript::new("/images/", "/movies/").video_update(&video).unwrap();
        assert!(stmt.contains("gps_latitude = 47.5"));
        assert!(stmt.contains("gps_latitude_ref_id = 'N'"));
        assert!(stmt.contains("gps_longitude = NULL"));
        assert!(stmt.contains("create_date = '2019-06-01 12:30:45+00:00'"));
        assert!(stmt.contains("thumb_sq_path = NULL"));
        assert!(stmt.ends_with("WHERE thumb_path = '/movies/2019/thumbnails/a.jpg';"));
    }

    #[test]
    fn test_script_section_order() {
        let photo = PhotoAsset::new(MediaRecord::new("/srv/images/xs/a.jpg", 1));
        let video = VideoAsset::new(MediaRecord::new("/srv/movies/thumbnails/a.jpg", 1));
        let text = UpdateScript::new("/images/", "/movies/").render(&[photo], &[video]);

        let create = text.find("CREATE INDEX ix_photo_photo_xs_path").unwrap();
        let photo_update = text.find("UPDATE photo.photo").unwrap();
        let video_update = text.find("UPDATE video.video").unwrap();
        let rollup = text.find("UPDATE photo.category").unwrap();
        let drop = text.find("DROP INDEX IF EXISTS photo.ix_photo_photo_xs_path").unwrap();
        assert!(create < photo_update && photo_update < video_update && video_update < rollup && rollup < drop);

        assert!(text.contains("total_size_thumb_sq = (SELECT SUM(thumb_sq_size) FROM video.video"));
        assert!(text.contains("total_duration"));
        assert!(text.contains("teaser_photo_sq_path = (SELECT xs_sq_path FROM photo.photo"));
    }
}
